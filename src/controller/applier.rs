//! Conflict-safe resource application.
//!
//! The single chokepoint through which the driver mutates owned Kubernetes
//! objects. Guarantees under concurrent modification:
//!
//! - fetch-or-create, then replace with the live resourceVersion
//! - on a 409 conflict, re-fetch the authoritative version and re-apply the
//!   desired mutable fields with bounded exponential backoff
//! - for StatefulSets, only the mutable fields (replicas, updateStrategy,
//!   pod template, object metadata) are ever copied onto the live object;
//!   selector, serviceName and volumeClaimTemplates are never submitted,
//!   even when they differ
//! - a write whose merged result equals the live object is skipped
//!
//! Conflict retries are logged and counted but never surfaced as
//! reconciliation failures unless the retry budget is exhausted.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{Api, PostParams};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::controller::error::{Error, Result};
use crate::health::HealthState;

/// Maximum attempts before the applier gives up on a conflicted write.
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Exponential backoff for conflict retries: 100ms, 200ms, 400ms... capped
/// at 2s.
pub fn conflict_backoff(attempt: u32) -> Duration {
    let millis = 100u64.saturating_mul(1 << attempt.min(10));
    Duration::from_millis(millis.min(2_000))
}

/// Outcome of an apply call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Object did not exist and was created.
    Created,
    /// Live object differed and was updated.
    Updated,
    /// Merged result equaled the live object; nothing was written.
    Unchanged,
}

/// Apply a desired object with a caller-supplied merge of mutable fields.
///
/// `merge` receives the freshly-fetched live object and the desired value
/// and must copy only the fields the caller considers mutable onto the live
/// object, leaving everything the API server owns (resourceVersion, status,
/// defaults on immutable fields) intact.
pub async fn apply_with_merge<K, F>(
    api: &Api<K>,
    desired: &K,
    merge: F,
    health_state: Option<&Arc<HealthState>>,
) -> Result<ApplyOutcome>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned,
    F: Fn(&mut K, &K),
{
    let name = desired.name_any();
    let kind = K::kind(&()).into_owned();

    for attempt in 0..MAX_CONFLICT_RETRIES {
        match api.get_opt(&name).await? {
            None => {
                match api.create(&PostParams::default(), desired).await {
                    Ok(_) => {
                        debug!(kind = %kind, name = %name, "Created resource");
                        return Ok(ApplyOutcome::Created);
                    }
                    // Another writer created it between our get and create;
                    // loop around and merge onto theirs.
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        record_conflict(health_state, &kind);
                        debug!(kind = %kind, name = %name, attempt, "Create raced, retrying as update");
                    }
                    Err(e) => return Err(Error::Kube(e)),
                }
            }
            Some(live) => {
                let mut merged = live.clone();
                merge(&mut merged, desired);

                let live_json = serde_json::to_value(&live)?;
                let merged_json = serde_json::to_value(&merged)?;
                if live_json == merged_json {
                    return Ok(ApplyOutcome::Unchanged);
                }

                match api.replace(&name, &PostParams::default(), &merged).await {
                    Ok(_) => {
                        debug!(kind = %kind, name = %name, "Updated resource");
                        return Ok(ApplyOutcome::Updated);
                    }
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        record_conflict(health_state, &kind);
                        warn!(
                            kind = %kind,
                            name = %name,
                            attempt,
                            "Optimistic concurrency conflict, re-fetching and retrying"
                        );
                    }
                    Err(e) => return Err(Error::Kube(e)),
                }
            }
        }

        tokio::time::sleep(conflict_backoff(attempt)).await;
    }

    Err(Error::ConflictRetriesExhausted {
        resource: format!("{}/{}", kind, name),
        attempts: MAX_CONFLICT_RETRIES,
    })
}

fn record_conflict(health_state: Option<&Arc<HealthState>>, kind: &str) {
    if let Some(state) = health_state {
        state.metrics.record_conflict_retry(kind);
    }
}

/// Merge mutable StatefulSet fields onto the live object.
///
/// Copies replicas, update strategy, pod template, and object
/// labels/annotations. Never touches selector, serviceName,
/// volumeClaimTemplates or podManagementPolicy: a difference there is a
/// no-op, not an error.
pub fn merge_statefulset(live: &mut StatefulSet, desired: &StatefulSet) {
    live.metadata.labels = desired.metadata.labels.clone();
    live.metadata.annotations = desired.metadata.annotations.clone();
    live.metadata.owner_references = desired.metadata.owner_references.clone();

    let Some(desired_spec) = desired.spec.as_ref() else {
        return;
    };
    if let Some(live_spec) = live.spec.as_mut() {
        live_spec.replicas = desired_spec.replicas;
        live_spec.update_strategy = desired_spec.update_strategy.clone();
        live_spec.template = desired_spec.template.clone();
    }
}

/// Merge mutable Service fields, preserving the server-assigned cluster IPs.
pub fn merge_service(live: &mut Service, desired: &Service) {
    live.metadata.labels = desired.metadata.labels.clone();
    live.metadata.annotations = desired.metadata.annotations.clone();
    live.metadata.owner_references = desired.metadata.owner_references.clone();

    let preserved_ip = live.spec.as_ref().and_then(|s| s.cluster_ip.clone());
    let preserved_ips = live.spec.as_ref().and_then(|s| s.cluster_ips.clone());
    live.spec = desired.spec.clone();
    if let Some(spec) = live.spec.as_mut() {
        spec.cluster_ip = preserved_ip;
        spec.cluster_ips = preserved_ips;
    }
}

/// Merge a ConfigMap: data and metadata are fully owned by the operator.
pub fn merge_configmap(live: &mut ConfigMap, desired: &ConfigMap) {
    live.metadata.labels = desired.metadata.labels.clone();
    live.metadata.annotations = desired.metadata.annotations.clone();
    live.metadata.owner_references = desired.metadata.owner_references.clone();
    live.data = desired.data.clone();
    live.binary_data = desired.binary_data.clone();
}
