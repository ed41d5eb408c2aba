//! Reconciler for Neo4jStandalone.
//!
//! Single-server deployments share the cluster's builders, applier, and
//! config rendering through the reconcilable-entity interface. A synthetic
//! one-server cluster spec feeds the shared builders; ownership is then
//! rewritten to the standalone resource so garbage collection follows it.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Api, ResourceExt, api::{Patch, PatchParams}, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::config::render::{BOLT_PORT, render_standalone_config};
use crate::controller::applier::{apply_with_merge, merge_configmap, merge_service, merge_statefulset};
use crate::controller::context::Context;
use crate::controller::entity::{ReconcilableEntity, converge};
use crate::controller::error::{Error, Result};
use crate::controller::status::upsert_condition;
use crate::controller::validation::validate_standalone;
use crate::crd::{
    Condition, Neo4jCluster, Neo4jClusterSpec, Neo4jStandalone, Neo4jStandaloneStatus,
    StandalonePhase, TopologySpec, reasons,
};
use crate::resources::common::{
    OPERATOR_NAME, server_statefulset_name, standalone_owner_reference,
};
use crate::resources::statefulset::PodScheduling;
use crate::resources::{configmap, services, statefulset};

/// Target objects for a standalone server.
pub struct StandaloneTargets {
    configmap: ConfigMap,
    service: Service,
    statefulset: StatefulSet,
}

/// Build the one-server cluster view of a standalone spec, used to drive
/// the shared builders.
fn as_cluster(standalone: &Neo4jStandalone) -> Neo4jCluster {
    Neo4jCluster {
        metadata: ObjectMeta {
            name: standalone.metadata.name.clone(),
            namespace: standalone.metadata.namespace.clone(),
            uid: standalone.metadata.uid.clone(),
            ..Default::default()
        },
        spec: Neo4jClusterSpec {
            topology: TopologySpec {
                servers: 1,
                ..Default::default()
            },
            image: standalone.spec.image.clone(),
            storage: standalone.spec.storage.clone(),
            auth: standalone.spec.auth.clone(),
            tls: standalone.spec.tls.clone(),
            resources: standalone.spec.resources.clone(),
            config: standalone.spec.config.clone(),
            labels: standalone.spec.labels.clone(),
            annotations: standalone.spec.annotations.clone(),
            ..Default::default()
        },
        status: None,
    }
}

/// Rewrite ownership so generated objects are garbage collected with the
/// standalone resource, not a phantom cluster.
fn reown(metadata: &mut ObjectMeta, owner: OwnerReference) {
    metadata.owner_references = Some(vec![owner]);
}

impl ReconcilableEntity for Neo4jStandalone {
    type Observed = Option<StatefulSet>;
    type Targets = StandaloneTargets;

    const KIND: &'static str = "Neo4jStandalone";

    async fn fetch_observed(&self, ctx: &Context) -> Result<Self::Observed> {
        let namespace = self.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &namespace);
        let view = as_cluster(self);
        Ok(api.get_opt(&server_statefulset_name(&view)).await?)
    }

    fn build_targets(&self, _observed: &Self::Observed) -> Result<Self::Targets> {
        let namespace = self.namespace().unwrap_or_else(|| "default".to_string());
        let view = as_cluster(self);
        let owner = standalone_owner_reference(self);

        let config_text = render_standalone_config(
            &self.spec.resources.limits.memory,
            &self.spec.image.tag,
            &view.name_any(),
            &namespace,
            &self.spec.config,
        )
        .map_err(|e| Error::Validation(e.to_string()))?;

        let mut cm = configmap::generate_configmap(&view, &config_text);
        reown(&mut cm.metadata, owner.clone());

        let mut service = services::generate_client_service(&view);
        reown(&mut service.metadata, owner.clone());

        let mut sts = statefulset::generate_statefulset(&view, &PodScheduling::default());
        reown(&mut sts.metadata, owner);
        // A single server resolves through the client service; the headless
        // discovery service is not generated, so point the StatefulSet at
        // the client service for pod identity.
        if let Some(spec) = sts.spec.as_mut() {
            spec.service_name = Some(view.name_any());
        }

        Ok(StandaloneTargets {
            configmap: cm,
            service,
            statefulset: sts,
        })
    }

    async fn apply_targets(
        &self,
        ctx: &Context,
        targets: &Self::Targets,
        _observed: &Self::Observed,
    ) -> Result<()> {
        let namespace = self.namespace().unwrap_or_else(|| "default".to_string());

        let cm_api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);
        apply_with_merge(&cm_api, &targets.configmap, merge_configmap, ctx.health_state.as_ref())
            .await?;

        let svc_api: Api<Service> = Api::namespaced(ctx.client.clone(), &namespace);
        apply_with_merge(&svc_api, &targets.service, merge_service, ctx.health_state.as_ref())
            .await?;

        let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &namespace);
        apply_with_merge(
            &sts_api,
            &targets.statefulset,
            merge_statefulset,
            ctx.health_state.as_ref(),
        )
        .await?;

        Ok(())
    }

    async fn project_status(&self, ctx: &Context, observed: &Self::Observed) -> Result<()> {
        let name = self.name_any();
        let namespace = self.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Neo4jStandalone> = Api::namespaced(ctx.client.clone(), &namespace);

        let ready = observed
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);

        let phase = if observed.is_none() {
            StandalonePhase::Empty
        } else if ready >= 1 {
            StandalonePhase::Ready
        } else {
            StandalonePhase::Initializing
        };

        let generation = self.metadata.generation;
        let mut conditions = self
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        if phase == StandalonePhase::Ready {
            upsert_condition(
                &mut conditions,
                Condition::ready(true, reasons::ALL_SERVERS_READY, "Server ready", generation),
            );
        } else {
            upsert_condition(
                &mut conditions,
                Condition::ready(
                    false,
                    reasons::CLUSTER_NOT_READY,
                    &format!("Phase: {}", phase),
                    generation,
                ),
            );
        }

        let status = Neo4jStandaloneStatus {
            phase,
            observed_generation: generation,
            conditions,
            connection_endpoint: if phase == StandalonePhase::Ready {
                Some(format!("neo4j://{}.{}.svc:{}", name, namespace, BOLT_PORT))
            } else {
                None
            },
        };

        let patch = serde_json::json!({ "status": status });
        api.patch_status(&name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Reconcile a Neo4jStandalone through the entity interface.
pub async fn reconcile(obj: Arc<Neo4jStandalone>, ctx: Arc<Context>) -> Result<Action> {
    let name = obj.name_any();
    debug!(name = %name, "Reconciling Neo4jStandalone");

    if obj.metadata.deletion_timestamp.is_some() {
        // Owned objects follow via garbage collection.
        return Ok(Action::await_change());
    }

    if let Err(e) = validate_standalone(&obj) {
        error!(name = %name, error = %e, "Validation failed");
        ctx.publish_warning_event(obj.as_ref(), reasons::VALIDATION_FAILED, "Validating", Some(e.to_string()))
            .await;
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Neo4jStandalone> = Api::namespaced(ctx.client.clone(), &namespace);
        let status = Neo4jStandaloneStatus {
            phase: StandalonePhase::Failed,
            observed_generation: obj.metadata.generation,
            conditions: vec![Condition::ready(
                false,
                reasons::VALIDATION_FAILED,
                &e.to_string(),
                obj.metadata.generation,
            )],
            connection_endpoint: None,
        };
        let patch = serde_json::json!({ "status": status });
        api.patch_status(&name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(&patch))
            .await?;
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    converge(obj.as_ref(), &ctx).await?;

    info!(name = %name, "Standalone reconciled");
    Ok(Action::requeue(Duration::from_secs(60)))
}

/// Error policy for the standalone controller.
pub fn error_policy(obj: Arc<Neo4jStandalone>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    if error.is_not_found() {
        return Action::await_change();
    }
    warn!(name = %name, error = %error, "Standalone reconciliation error");
    Action::requeue(error.requeue_after())
}
