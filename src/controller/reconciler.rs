//! Reconciliation driver for Neo4jCluster.
//!
//! The top-level control loop: fetch desired and observed state, run the
//! validation gate, execute side effects in strict dependency order
//! (Certificate → secret projection → ConfigMap → RBAC → Services →
//! placement → StatefulSet → backup → status), and decide the requeue.
//!
//! The primary law is zero-write idempotence: re-running with no spec
//! change and no external drift produces no writes. Every step diffs
//! against live state (the change classifier for the StatefulSet, content
//! hashing for the ConfigMap, merged-equals-live checks in the applier)
//! and no-ops when unchanged.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::{
    Api, ResourceExt,
    api::{ApiResource, DynamicObject, Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::config::render::{BOLT_PORT, render_cluster_config};
use crate::controller::{
    applier::{ApplyOutcome, apply_with_merge, merge_configmap, merge_service, merge_statefulset},
    auth::get_auth_password,
    change::{Significance, classify_statefulset},
    config_convergence::ConfigDecision,
    context::Context,
    error::Error,
    rate_limit::RateDecision,
    split_brain,
    state_machine::{ClusterEvent, ClusterStateMachine, TransitionContext, TransitionResult},
    status::{patch_status_with_retry, status_changed, upsert_condition},
    topology::PlacementPlan,
    upgrade,
    validation::{ValidationMode, validate_cluster},
};
use crate::crd::{
    ClusterPhase, Condition, Neo4jCluster, UpgradePhase, reasons,
};
use crate::resources::{
    backup, certificate, common, configmap, pdb, rbac, services, statefulset,
};

/// Field manager name for server-side apply of dynamic objects
pub const FIELD_MANAGER: &str = common::OPERATOR_NAME;

/// Finalizer name for graceful deletion
pub const FINALIZER: &str = "neo4joperator.io/finalizer";

/// Pod template annotation carrying the restart-relevant config hash.
/// Bumping it rolls the servers; the convergence manager decides when.
pub const CONFIG_HASH_ANNOTATION: &str = "neo4joperator.io/config-hash";

/// Fixed safety-net requeue for a healthy cluster, independent of watch
/// events.
const READY_REQUEUE: Duration = Duration::from_secs(30);

/// Everything observed and built during one pass, threaded through the
/// side-effect pipeline.
struct PassState {
    live_sts: Option<StatefulSet>,
    placement: PlacementPlan,
    config_hash: String,
    upgrade_requeue: Option<Duration>,
}

/// Reconcile a Neo4jCluster
pub async fn reconcile(obj: Arc<Neo4jCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let key = format!("{}/{}", namespace, name);

    debug!(name = %name, namespace = %namespace, "Reconciling Neo4jCluster");

    let api: Api<Neo4jCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    // Never trust the cached event payload: re-fetch the authoritative
    // object at the start of every invocation.
    let obj = match api.get_opt(&name).await? {
        Some(fresh) => fresh,
        None => {
            debug!(name = %name, "Cluster gone, nothing to reconcile");
            return Ok(Action::await_change());
        }
    };

    // Handle deletion
    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &namespace, &key).await;
    }

    // Ensure finalizer is present
    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let observed_gen = obj.status.as_ref().and_then(|s| s.observed_generation);
    let current_gen = obj.metadata.generation;
    let spec_changed = observed_gen != current_gen;

    // Observed-state churn is rate limited; spec edits bypass the limiter.
    if let RateDecision::Throttled { retry_after } = ctx.rate_limiter.check(&key, spec_changed).await
    {
        debug!(name = %name, ?retry_after, "Reconcile throttled");
        return Ok(Action::requeue(retry_after));
    }

    // Validation gate: failures short-circuit without mutating any
    // Kubernetes resource; only the status records the failure.
    let mode = if observed_gen.is_none() {
        ValidationMode::Create
    } else {
        ValidationMode::Update
    };
    if let Err(e) = validate_cluster(&obj, mode) {
        error!(name = %name, error = %e, "Validation failed");
        ctx.publish_warning_event(&obj, reasons::VALIDATION_FAILED, "Validating", Some(e.to_string()))
            .await;
        let message = e.to_string();
        patch_status_with_retry(&api, &name, |status| {
            status.phase = ClusterPhase::Failed;
            upsert_condition(
                &mut status.conditions,
                Condition::ready(false, reasons::VALIDATION_FAILED, &message, current_gen),
            );
        })
        .await?;
        return Ok(Action::requeue(Duration::from_secs(300)));
    }

    // Serialize against the split-brain tick for this cluster.
    let guard = ctx.guard_for(&key).await;
    let _held = guard.lock().await;

    let current_phase = obj
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or(ClusterPhase::Empty);

    // A completed upgrade is cleared on the reconciliation after it
    // finished; the nested state is derived, not independently persisted.
    let live_upgrade = obj
        .status
        .as_ref()
        .and_then(|s| s.upgrade.clone())
        .filter(|u| !u.phase.is_terminal());

    // Side-effect pipeline in strict dependency order.
    let pass = match run_side_effects(&ctx, &obj, &namespace, &key, current_phase, live_upgrade).await
    {
        Ok(pass) => pass,
        Err(e) => return fail_or_wait(&api, &ctx, &obj, &key, &name, current_gen, e).await,
    };

    // Phase determination from observed evidence.
    let desired_servers = obj.spec.topology.servers;
    let ready_servers = pass
        .live_sts
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let live_replicas = pass
        .live_sts
        .as_ref()
        .and_then(|s| s.spec.as_ref())
        .and_then(|s| s.replicas)
        .unwrap_or(0);

    let upgrade_state = obj.status.as_ref().and_then(|s| s.upgrade.clone());
    let full_views = if current_phase == ClusterPhase::Forming {
        count_full_views(&ctx, &obj, &namespace).await
    } else {
        0
    };

    let transition_ctx = TransitionContext {
        ready_servers,
        desired_servers,
        members_with_full_view: full_views,
        spec_changed,
        error_message: None,
    };

    let event = determine_cluster_event(
        current_phase,
        &transition_ctx,
        upgrade_state.as_ref().map(|u| u.phase),
        live_replicas,
    );

    let state_machine = ClusterStateMachine::new();
    let next_phase = match event {
        Some(event) => match state_machine.transition(&current_phase, event, &transition_ctx) {
            TransitionResult::Success { to, description, .. } => {
                info!(name = %name, from = %current_phase, to = %to, "Phase transition: {}", description);
                to
            }
            TransitionResult::GuardFailed { reason, .. } => {
                debug!(name = %name, phase = %current_phase, reason = %reason, "Transition guard held");
                current_phase
            }
            TransitionResult::InvalidTransition { .. } => current_phase,
        },
        None => current_phase,
    };

    // Project status. The upgrade sub-state carries over unless it just
    // completed, in which case it is reset to nil here.
    let clear_upgrade = upgrade_state
        .as_ref()
        .is_some_and(|u| u.phase == UpgradePhase::Completed && next_phase == ClusterPhase::Ready);
    let previous_status = obj.status.clone();
    let placement_status = pass.placement.to_status();
    let config_hash = pass.config_hash.clone();
    let endpoint = format!("neo4j://{}.{}.svc:{}", name, namespace, BOLT_PORT);
    let tls_secret = obj.spec.tls.as_ref().map(|_| certificate::certificate_secret_name(&obj));
    let new_status = patch_status_with_retry(&api, &name, |status| {
        status.phase = next_phase;
        status.servers = format!("{}/{}", ready_servers, desired_servers);
        status.topology = Some(placement_status.clone());
        status.config_hash = Some(config_hash.clone());
        status.connection_endpoint = if next_phase == ClusterPhase::Ready {
            Some(endpoint.clone())
        } else {
            None
        };
        status.tls_secret = tls_secret.clone();
        // The pipeline already patched fresh upgrade state; here it is only
        // cleared once completed, never overwritten with a stale copy.
        if clear_upgrade {
            status.upgrade = None;
        }

        let generation = current_gen;
        match next_phase {
            ClusterPhase::Ready => {
                upsert_condition(
                    &mut status.conditions,
                    Condition::ready(true, reasons::ALL_SERVERS_READY, "All servers ready", generation),
                );
                upsert_condition(
                    &mut status.conditions,
                    Condition::progressing(false, reasons::RECONCILING, "Cluster converged", generation),
                );
            }
            ClusterPhase::Failed => {}
            _ => {
                upsert_condition(
                    &mut status.conditions,
                    Condition::ready(
                        false,
                        reasons::CLUSTER_NOT_READY,
                        &format!("Phase: {}", next_phase),
                        generation,
                    ),
                );
                upsert_condition(
                    &mut status.conditions,
                    Condition::progressing(true, reasons::RECONCILING, &format!("Phase: {}", next_phase), generation),
                );
            }
        }
        if let Some(upgrade) = status.upgrade.clone() {
            if upgrade.phase == UpgradePhase::Paused {
                upsert_condition(
                    &mut status.conditions,
                    Condition::new(
                        "UpgradePaused",
                        true,
                        reasons::UPGRADE_PAUSED,
                        &format!("Unhealthy servers: {:?}", upgrade.unhealthy_servers),
                        generation,
                    ),
                );
            }
        }
    })
    .await?;

    // Events only on status-changing transitions, never for no-op passes.
    if status_changed(previous_status.as_ref(), &new_status) && next_phase != current_phase {
        ctx.publish_normal_event(
            &obj,
            &format!("Phase{}", next_phase),
            "Reconciling",
            Some(format!("{} -> {}", current_phase, next_phase)),
        )
        .await;
    }

    // Record metrics
    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state.metrics.record_reconcile(&namespace, &name, duration);
        health_state.metrics.set_cluster_servers(
            &namespace,
            &name,
            i64::from(desired_servers),
            i64::from(ready_servers),
        );
    }
    ctx.rate_limiter.record_success(&key).await;

    // Requeue policy: fixed safety net when Ready, faster while converging.
    let requeue = pass
        .upgrade_requeue
        .unwrap_or_else(|| requeue_for_phase(next_phase));
    Ok(Action::requeue(requeue))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Neo4jCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(Duration::from_secs(300))
    }
}

/// Requeue interval per phase.
pub fn requeue_for_phase(phase: ClusterPhase) -> Duration {
    match phase {
        ClusterPhase::Ready => READY_REQUEUE,
        ClusterPhase::Empty | ClusterPhase::Initializing => Duration::from_secs(10),
        ClusterPhase::Forming => Duration::from_secs(10),
        ClusterPhase::Upgrading | ClusterPhase::Scaling => Duration::from_secs(10),
        ClusterPhase::Failed => Duration::from_secs(300),
    }
}

/// Pick the event to propose to the state machine from the evidence.
pub fn determine_cluster_event(
    phase: ClusterPhase,
    ctx: &TransitionContext,
    upgrade_phase: Option<UpgradePhase>,
    live_replicas: i32,
) -> Option<ClusterEvent> {
    match phase {
        ClusterPhase::Empty => Some(ClusterEvent::ResourcesApplied),
        ClusterPhase::Initializing => {
            if ctx.all_pods_ready() {
                Some(ClusterEvent::PodsRunning)
            } else {
                None
            }
        }
        ClusterPhase::Forming => {
            if ctx.formation_complete() {
                Some(ClusterEvent::ClusterFormed)
            } else {
                None
            }
        }
        ClusterPhase::Ready => {
            if matches!(
                upgrade_phase,
                Some(UpgradePhase::Pending | UpgradePhase::InProgress | UpgradePhase::Paused)
            ) {
                Some(ClusterEvent::UpgradeDetected)
            } else if ctx.spec_changed
                && live_replicas != 0
                && (live_replicas != ctx.desired_servers || !ctx.all_pods_ready())
            {
                // The replica write may already have landed this pass; the
                // scale is still in flight until the pods catch up.
                Some(ClusterEvent::ScaleDetected)
            } else {
                None
            }
        }
        ClusterPhase::Upgrading => {
            if matches!(upgrade_phase, Some(UpgradePhase::Completed) | None) {
                Some(ClusterEvent::UpgradeCompleted)
            } else {
                None
            }
        }
        ClusterPhase::Scaling => {
            if live_replicas == ctx.desired_servers && ctx.all_pods_ready() {
                Some(ClusterEvent::ScaleCompleted)
            } else {
                None
            }
        }
        ClusterPhase::Failed => {
            if ctx.spec_changed {
                Some(ClusterEvent::SpecCorrected)
            } else {
                None
            }
        }
    }
}

/// Execute the ordered side-effect pipeline. Each step is gated on the
/// success of the previous one.
async fn run_side_effects(
    ctx: &Context,
    obj: &Neo4jCluster,
    namespace: &str,
    key: &str,
    current_phase: ClusterPhase,
    live_upgrade: Option<crate::crd::UpgradeState>,
) -> Result<PassState, Error> {
    let name = obj.name_any();

    // 1. TLS certificate
    if let Some(cert) = certificate::generate_certificate(obj) {
        let cert_ar = ApiResource::from_gvk(&kube::api::GroupVersionKind {
            group: "cert-manager.io".to_string(),
            version: "v1".to_string(),
            kind: "Certificate".to_string(),
        });
        let cert_api: Api<DynamicObject> =
            Api::namespaced_with(ctx.client.clone(), namespace, &cert_ar);
        let cert_name = certificate::certificate_secret_name(obj);
        let cert_value: serde_json::Value = serde_json::to_value(&cert)?;
        cert_api
            .patch(
                &cert_name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&cert_value),
            )
            .await?;
    }

    // 2. Secret projection: the auth secret must exist before any pod can
    // start; absence is a waiting state, not a failure.
    if get_auth_password(&ctx.client, namespace, &obj.spec.auth.secret_ref)
        .await?
        .is_none()
    {
        return Err(Error::DependencyNotReady(format!(
            "auth secret {} not found",
            obj.spec.auth.secret_ref.name
        )));
    }

    // 3. ConfigMap through the convergence manager.
    let sts_name = common::server_statefulset_name(obj);
    let discovery = common::discovery_service_name(obj);
    let config_text = render_cluster_config(&obj.spec, &sts_name, &discovery, namespace)
        .map_err(|e| Error::Validation(e.to_string()))?;

    let mut restart_hash_changed = false;
    let config_hash;
    match ctx.config_debouncer.decide(key, &config_text).await {
        ConfigDecision::Apply { hash, restart_required } => {
            let cm = configmap::generate_configmap(obj, &config_text);
            let cm_api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
            let outcome =
                apply_with_merge(&cm_api, &cm, merge_configmap, ctx.health_state.as_ref()).await?;
            ctx.config_debouncer.mark_applied(key, &config_text).await;
            if outcome != ApplyOutcome::Unchanged && restart_required {
                // Restart-requiring settings propagate through the pod
                // template hash; informational changes leave pods alone.
                restart_hash_changed = true;
                info!(name = %name, "Configuration change requires rolling restart");
            }
            config_hash = hash;
        }
        ConfigDecision::Unchanged => {
            config_hash = crate::controller::config_convergence::content_hash(&config_text);
        }
        ConfigDecision::Debounced { retry_after } => {
            debug!(name = %name, ?retry_after, "ConfigMap write debounced");
            config_hash = obj
                .status
                .as_ref()
                .and_then(|s| s.config_hash.clone())
                .unwrap_or_default();
        }
    }

    // 4. RBAC
    let sa_api: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), namespace);
    apply_with_merge(
        &sa_api,
        &rbac::generate_service_account(obj),
        |live, desired| {
            live.metadata.labels = desired.metadata.labels.clone();
            live.metadata.owner_references = desired.metadata.owner_references.clone();
        },
        ctx.health_state.as_ref(),
    )
    .await?;
    let role_api: Api<Role> = Api::namespaced(ctx.client.clone(), namespace);
    apply_with_merge(
        &role_api,
        &rbac::generate_role(obj),
        |live, desired| {
            live.metadata.labels = desired.metadata.labels.clone();
            live.metadata.owner_references = desired.metadata.owner_references.clone();
            live.rules = desired.rules.clone();
        },
        ctx.health_state.as_ref(),
    )
    .await?;
    let binding_api: Api<RoleBinding> = Api::namespaced(ctx.client.clone(), namespace);
    apply_with_merge(
        &binding_api,
        &rbac::generate_role_binding(obj),
        |live, desired| {
            // roleRef is immutable; only subjects and metadata converge.
            live.metadata.labels = desired.metadata.labels.clone();
            live.metadata.owner_references = desired.metadata.owner_references.clone();
            live.subjects = desired.subjects.clone();
        },
        ctx.health_state.as_ref(),
    )
    .await?;

    // 5. Services
    let svc_api: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    apply_with_merge(
        &svc_api,
        &services::generate_discovery_service(obj),
        merge_service,
        ctx.health_state.as_ref(),
    )
    .await?;
    apply_with_merge(
        &svc_api,
        &services::generate_client_service(obj),
        merge_service,
        ctx.health_state.as_ref(),
    )
    .await?;

    // 6. Topology placement plan
    let placement = PlacementPlan::for_cluster(obj);
    let scheduling = placement.scheduling(
        obj,
        obj.spec.topology.anti_affinity,
        &obj.spec.topology.topology_key,
    );

    // 7. StatefulSet through classifier + conflict-safe applier.
    let mut desired_sts = statefulset::generate_statefulset(obj, &scheduling);
    let restart_hash = if restart_hash_changed {
        config_hash.clone()
    } else {
        obj.status
            .as_ref()
            .and_then(|s| s.config_hash.clone())
            .unwrap_or_else(|| config_hash.clone())
    };
    annotate_template(&mut desired_sts, CONFIG_HASH_ANNOTATION, &restart_hash);

    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    let live_sts = sts_api.get_opt(&sts_name).await?;
    let forming = matches!(
        current_phase,
        ClusterPhase::Empty | ClusterPhase::Initializing | ClusterPhase::Forming
    );

    let mut upgrade_requeue = None;
    match &live_sts {
        None => {
            apply_with_merge(&sts_api, &desired_sts, merge_statefulset, ctx.health_state.as_ref())
                .await?;
            info!(name = %name, "Created server StatefulSet");
        }
        Some(live) => {
            let report = classify_statefulset(live, &desired_sts, forming);
            if !report.ignored_immutable.is_empty() {
                warn!(
                    name = %name,
                    fields = ?report.ignored_immutable,
                    "Ignoring immutable StatefulSet field differences"
                );
            }
            match report.significance {
                Significance::NoOp => {
                    debug!(name = %name, "StatefulSet unchanged");
                    // Clear a stale upgrade partition once everything
                    // converged.
                    if upgrade::needs_partition_reset(live) && live_upgrade.is_none() {
                        apply_with_merge(
                            &sts_api,
                            &desired_sts,
                            merge_statefulset,
                            ctx.health_state.as_ref(),
                        )
                        .await?;
                    }
                }
                Significance::SafeLive => {
                    debug!(name = %name, fields = ?report.changed_fields, "Applying live-safe changes");
                    apply_with_merge(
                        &sts_api,
                        &desired_sts,
                        merge_statefulset,
                        ctx.health_state.as_ref(),
                    )
                    .await?;
                }
                Significance::BlockedDuringFormation => {
                    info!(
                        name = %name,
                        fields = ?report.changed_fields,
                        "Deferring restart-requiring change until formation completes"
                    );
                }
                Significance::RequiresRollingRestart => {
                    if report.image_changed || live_upgrade.is_some() {
                        // Image changes never patch the StatefulSet
                        // directly: the orchestrator owns the rollout.
                        let state = live_upgrade
                            .clone()
                            .or_else(|| upgrade::detect_upgrade(obj, live));
                        if let Some(state) = state {
                            let (next, requeue) =
                                upgrade::reconcile_upgrade(ctx, obj, namespace, &desired_sts, state)
                                    .await?;
                            let api: Api<Neo4jCluster> =
                                Api::namespaced(ctx.client.clone(), namespace);
                            let next_clone = next.clone();
                            patch_status_with_retry(&api, &name, move |status| {
                                status.upgrade = Some(next_clone.clone());
                            })
                            .await?;
                            upgrade_requeue = Some(requeue);
                        }
                    } else {
                        // Config/template restart: rolled by the
                        // StatefulSet controller under the PDB's quorum
                        // budget.
                        info!(name = %name, fields = ?report.changed_fields, "Applying restart-requiring change");
                        apply_with_merge(
                            &sts_api,
                            &desired_sts,
                            merge_statefulset,
                            ctx.health_state.as_ref(),
                        )
                        .await?;
                    }
                }
            }
        }
    }

    // Drive a live upgrade even when the template already matches (the
    // classifier sees NoOp once the image is pushed; batches still need
    // health-gating forward).
    if upgrade_requeue.is_none() {
        if let Some(state) = live_upgrade {
            let (next, requeue) =
                upgrade::reconcile_upgrade(ctx, obj, namespace, &desired_sts, state).await?;
            let api: Api<Neo4jCluster> = Api::namespaced(ctx.client.clone(), namespace);
            let next_clone = next.clone();
            patch_status_with_retry(&api, &name, move |status| {
                status.upgrade = Some(next_clone.clone());
            })
            .await?;
            upgrade_requeue = Some(requeue);
        }
    }

    // 8. Backup workload
    if obj.spec.backups.enabled {
        apply_with_merge(
            &sts_api,
            &backup::generate_backup_statefulset(obj),
            merge_statefulset,
            ctx.health_state.as_ref(),
        )
        .await?;
    }

    // 9. PodDisruptionBudget holding the quorum budget
    let pdb_api: Api<PodDisruptionBudget> = Api::namespaced(ctx.client.clone(), namespace);
    apply_with_merge(
        &pdb_api,
        &pdb::generate_pod_disruption_budget(obj),
        |live, desired| {
            live.metadata.labels = desired.metadata.labels.clone();
            live.metadata.owner_references = desired.metadata.owner_references.clone();
            live.spec = desired.spec.clone();
        },
        ctx.health_state.as_ref(),
    )
    .await?;

    let live_sts = sts_api.get_opt(&sts_name).await?;

    Ok(PassState {
        live_sts,
        placement,
        config_hash,
        upgrade_requeue,
    })
}

/// Translate a pipeline error into a status condition and a requeue.
async fn fail_or_wait(
    api: &Api<Neo4jCluster>,
    ctx: &Context,
    obj: &Neo4jCluster,
    key: &str,
    name: &str,
    generation: Option<i64>,
    error: Error,
) -> Result<Action, Error> {
    let reason = error.reason();
    let message = error.to_string();

    if error.is_waiting() {
        // Expected, recoverable: surfaced as waiting, never as Failed.
        debug!(name = %name, error = %message, "Waiting on dependency");
        patch_status_with_retry(api, name, |status| {
            upsert_condition(
                &mut status.conditions,
                Condition::ready(false, reason, &message, generation),
            );
        })
        .await?;
        return Ok(Action::requeue(error.requeue_after()));
    }

    if error.is_conflict() || matches!(error, Error::ConflictRetriesExhausted { .. }) {
        // Expected noise under concurrent writers: backoff, do not fail.
        let backoff = ctx.rate_limiter.record_conflict(key).await;
        warn!(name = %name, error = %message, ?backoff, "Write conflict, backing off");
        return Ok(Action::requeue(backoff));
    }

    if error.is_retryable() {
        warn!(name = %name, error = %message, "Transient error during side effects");
        return Err(error);
    }

    error!(name = %name, error = %message, "Reconciliation failed");
    ctx.publish_warning_event(obj, reason, "Reconciling", Some(message.clone()))
        .await;
    patch_status_with_retry(api, name, |status| {
        status.phase = ClusterPhase::Failed;
        upsert_condition(
            &mut status.conditions,
            Condition::ready(false, reason, &message, generation),
        );
    })
    .await?;
    Ok(Action::requeue(Duration::from_secs(300)))
}

/// Count servers reporting the complete membership view, for the
/// Forming → Ready gate.
async fn count_full_views(ctx: &Context, obj: &Neo4jCluster, namespace: &str) -> i32 {
    let expected = obj.spec.topology.servers as usize;
    match split_brain::collect_snapshot(ctx, obj, namespace).await {
        Ok(snapshot) => snapshot
            .values()
            .filter(|view| view.active_count() >= expected)
            .count() as i32,
        Err(e) => {
            debug!(error = %e, "Membership views unavailable during formation");
            0
        }
    }
}

/// Set an annotation on the pod template.
fn annotate_template(sts: &mut StatefulSet, annotation: &str, value: &str) {
    if let Some(spec) = sts.spec.as_mut() {
        let metadata = spec.template.metadata.get_or_insert_with(Default::default);
        metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(annotation.to_string(), value.to_string());
    }
}

/// Handle deletion of a Neo4jCluster: drop per-cluster state, then remove
/// the finalizer so garbage collection reclaims owned objects.
async fn handle_deletion(
    obj: &Neo4jCluster,
    ctx: &Context,
    namespace: &str,
    key: &str,
) -> Result<Action, Error> {
    let name = obj.name_any();
    info!(name = %name, "Handling deletion");

    ctx.forget_cluster(key).await;

    let api: Api<Neo4jCluster> = Api::namespaced(ctx.client.clone(), namespace);
    remove_finalizer(&api, &name).await?;

    Ok(Action::await_change())
}

/// Add finalizer to resource
async fn add_finalizer(api: &Api<Neo4jCluster>, name: &str) -> Result<(), Error> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": [FINALIZER]
        }
    });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Remove finalizer from resource
async fn remove_finalizer(api: &Api<Neo4jCluster>, name: &str) -> Result<(), Error> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": null
        }
    });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
