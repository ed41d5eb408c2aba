//! Status projection for Neo4jCluster.
//!
//! Conditions are ordered and keyed by type; writing the same status twice
//! has no additional effect (the transition time only moves when the status
//! value actually changes). ClusterStatus is the one piece of state touched
//! by multiple subsystems (driver, upgrade orchestrator, split-brain
//! detector), so every write re-fetches the latest object and retries on
//! conflict.

use kube::api::{Api, Patch, PatchParams};
use tracing::debug;

use crate::controller::applier::{MAX_CONFLICT_RETRIES, conflict_backoff};
use crate::controller::error::{Error, Result};
use crate::crd::{Condition, Neo4jCluster, Neo4jClusterStatus};
use crate::resources::common::OPERATOR_NAME;

/// Insert or update a condition keyed by type.
///
/// The last transition time is preserved when the status value does not
/// change, so repeated identical writes are idempotent.
pub fn upsert_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        Some(existing) => {
            let transition_time = if existing.status == new.status {
                existing.last_transition_time.clone()
            } else {
                new.last_transition_time.clone()
            };
            *existing = Condition {
                last_transition_time: transition_time,
                ..new
            };
        }
        None => conditions.push(new),
    }
}

/// Whether two statuses are equal for event-emission purposes: events fire
/// on status-changing transitions only, not on no-op reconciliations.
pub fn status_changed(previous: Option<&Neo4jClusterStatus>, next: &Neo4jClusterStatus) -> bool {
    match previous {
        None => true,
        Some(prev) => {
            prev.phase != next.phase
                || prev.servers != next.servers
                || prev.upgrade != next.upgrade
                || prev.conditions.len() != next.conditions.len()
                || prev
                    .conditions
                    .iter()
                    .zip(next.conditions.iter())
                    .any(|(a, b)| a.r#type != b.r#type || a.status != b.status || a.reason != b.reason)
        }
    }
}

/// Patch the status subresource, re-fetching and retrying on conflict.
///
/// `mutate` is applied to the freshly-fetched status on every attempt so a
/// retry always works from the authoritative version.
pub async fn patch_status_with_retry<F>(
    api: &Api<Neo4jCluster>,
    name: &str,
    mutate: F,
) -> Result<Neo4jClusterStatus>
where
    F: Fn(&mut Neo4jClusterStatus),
{
    for attempt in 0..MAX_CONFLICT_RETRIES {
        let current = api.get(name).await?;
        let mut status = current.status.clone().unwrap_or_default();
        status.observed_generation = current.metadata.generation;
        mutate(&mut status);

        let patch = serde_json::json!({ "status": status });
        match api
            .patch_status(name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(status),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(name = %name, attempt, "Status update conflict, retrying");
                tokio::time::sleep(conflict_backoff(attempt)).await;
            }
            Err(e) => return Err(Error::Kube(e)),
        }
    }

    Err(Error::ConflictRetriesExhausted {
        resource: format!("neo4jclusters/{}/status", name),
        attempts: MAX_CONFLICT_RETRIES,
    })
}
