//! Rolling upgrade orchestration.
//!
//! Drives every server from `previousVersion` to `targetVersion` without
//! ever taking more than the quorum budget offline, with health
//! verification between batches.
//!
//! Batches move through the StatefulSet's RollingUpdate partition: ordinals
//! at or above the partition receive the new revision, so each batch lowers
//! the partition by the batch size. A batch must pass the health gate —
//! pod readiness (HTTP probe) AND rejoin of cluster membership over Bolt —
//! before the next batch starts. The HTTP probe alone is deliberately not
//! sufficient: a server can answer HTTP while still outside the cluster.
//!
//! A failed health gate is retried within a bounded budget, then the
//! upgrade transitions to Paused. Paused is recoverable: when the failure
//! clears, the next reconciliation resumes where it stopped. It is never
//! abandoned silently, and rollback is an explicit user action (reverting
//! the spec tag), which arrives here as a new upgrade in the opposite
//! direction.

use std::time::Duration;

use jiff::Timestamp;
use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, ResourceExt};
use tracing::{debug, info, warn};

use crate::client::{BoltClient, BoltConfig, fetch_membership_view};
use crate::config::render::BOLT_PORT;
use crate::controller::applier::{apply_with_merge, merge_statefulset};
use crate::controller::auth::get_auth_password;
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::crd::{
    Neo4jCluster, UpgradePhase, UpgradeProgress, UpgradeState, quorum_budget, reasons,
};
use crate::resources::common::{server_pod_dns, server_pod_name};

/// Requeue while a batch is restarting.
const BATCH_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Requeue while Paused, waiting for the failure to clear.
const PAUSED_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Quorum-safe number of servers to upgrade concurrently:
/// floor((N-1)/2), minimum 1.
pub fn batch_size(servers: i32) -> i32 {
    quorum_budget(servers).max(1)
}

/// StatefulSet partition for the current batch: ordinals at or above the
/// partition run the new revision.
pub fn partition_for(total: i32, upgraded: i32, batch: i32) -> i32 {
    (total - upgraded - batch).max(0)
}

/// Ordinals restarting in the current batch, in deterministic index order.
pub fn batch_ordinals(total: i32, upgraded: i32, batch: i32) -> Vec<i32> {
    let partition = partition_for(total, upgraded, batch);
    (partition..(total - upgraded)).collect()
}

/// Extract the image tag from a full reference ("neo4j:5.26.0-enterprise").
pub fn image_tag(reference: &str) -> &str {
    reference.rsplit(':').next().unwrap_or(reference)
}

/// Detect whether an upgrade should start: the observed StatefulSet image
/// differs from the desired one and no upgrade is live.
pub fn detect_upgrade(cluster: &Neo4jCluster, live_sts: &StatefulSet) -> Option<UpgradeState> {
    if let Some(upgrade) = cluster.status.as_ref().and_then(|s| s.upgrade.as_ref()) {
        if !upgrade.phase.is_terminal() {
            return None;
        }
    }

    let live_image = live_sts
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .as_deref()?;
    let desired_image = cluster.spec.image.reference();

    if live_image == desired_image {
        return None;
    }

    Some(UpgradeState {
        phase: UpgradePhase::Pending,
        previous_version: image_tag(live_image).to_string(),
        target_version: cluster.spec.image.tag.clone(),
        progress: UpgradeProgress::new(cluster.spec.topology.servers),
        unhealthy_servers: Vec::new(),
        batch_started_at: None,
        batch_attempts: 0,
    })
}

/// Clone the desired StatefulSet with the batch partition set.
fn with_partition(desired: &StatefulSet, partition: i32) -> StatefulSet {
    let mut sts = desired.clone();
    if let Some(spec) = sts.spec.as_mut() {
        spec.update_strategy = Some(StatefulSetUpdateStrategy {
            type_: Some("RollingUpdate".to_string()),
            rolling_update: Some(RollingUpdateStatefulSetStrategy {
                partition: Some(partition),
                ..Default::default()
            }),
        });
    }
    sts
}

/// Check the health gate for a batch of ordinals.
///
/// A server passes when its pod is Ready (readiness probe), runs the target
/// image, and reappears in cluster membership as seen by itself. Returns
/// the pod names that fail.
async fn check_batch_health(
    ctx: &Context,
    cluster: &Neo4jCluster,
    namespace: &str,
    ordinals: &[i32],
) -> Result<Vec<String>> {
    let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let target_image = cluster.spec.image.reference();
    let password = get_auth_password(&ctx.client, namespace, &cluster.spec.auth.secret_ref).await?;

    let mut unhealthy = Vec::new();

    for &ordinal in ordinals {
        let pod_name = server_pod_name(cluster, ordinal);

        let pod = match pod_api.get_opt(&pod_name).await? {
            Some(pod) => pod,
            None => {
                unhealthy.push(pod_name);
                continue;
            }
        };

        let runs_target_image = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.as_deref())
            == Some(target_image.as_str());

        let ready = pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false);

        if !runs_target_image || !ready {
            unhealthy.push(pod_name);
            continue;
        }

        // Membership rejoin: the strict gate. Skipped only when credentials
        // are not resolvable, in which case the pod counts as unhealthy
        // rather than silently passing.
        let Some(password) = password.as_deref() else {
            unhealthy.push(pod_name);
            continue;
        };
        let host = server_pod_dns(cluster, namespace, ordinal);
        let config = BoltConfig::for_endpoint(&host, BOLT_PORT, password);
        let rejoined = match BoltClient::connect(&config).await {
            Ok(client) => match fetch_membership_view(&client).await {
                Ok(view) => view.sees_pod(&pod_name),
                Err(e) => {
                    debug!(pod = %pod_name, error = %e, "Membership query failed during health gate");
                    false
                }
            },
            Err(e) => {
                debug!(pod = %pod_name, error = %e, "Bolt connect failed during health gate");
                false
            }
        };

        if !rejoined {
            unhealthy.push(pod_name);
        }
    }

    Ok(unhealthy)
}

fn batch_elapsed(state: &UpgradeState, now: Timestamp) -> Option<i64> {
    state
        .batch_started_at
        .as_ref()
        .and_then(|s| s.parse::<Timestamp>().ok())
        .map(|start| now.as_second() - start.as_second())
}

/// Advance the upgrade by one reconciliation step.
///
/// `desired_sts` is the freshly-built StatefulSet carrying the target
/// image. Returns the new upgrade state and the requeue interval.
pub async fn reconcile_upgrade(
    ctx: &Context,
    cluster: &Neo4jCluster,
    namespace: &str,
    desired_sts: &StatefulSet,
    state: UpgradeState,
) -> Result<(UpgradeState, Duration)> {
    let name = cluster.name_any();
    let total = state.progress.total;
    let batch = batch_size(total);
    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    let now = Timestamp::now();

    match state.phase {
        UpgradePhase::Pending => {
            // First batch: push the new template with the partition holding
            // back everything below the batch.
            let partition = partition_for(total, 0, batch);
            let target = with_partition(desired_sts, partition);
            apply_with_merge(
                &sts_api,
                &target,
                merge_statefulset,
                ctx.health_state.as_ref(),
            )
            .await?;

            info!(
                cluster = %name,
                from = %state.previous_version,
                to = %state.target_version,
                batch,
                "Starting rolling upgrade"
            );
            ctx.publish_normal_event(
                cluster,
                "UpgradeStarted",
                "Upgrading",
                Some(format!(
                    "Rolling upgrade {} -> {} in batches of {}",
                    state.previous_version, state.target_version, batch
                )),
            )
            .await;

            let next = UpgradeState {
                phase: UpgradePhase::InProgress,
                progress: UpgradeProgress::with_batch(total, 0, batch),
                unhealthy_servers: Vec::new(),
                batch_started_at: Some(now.to_string()),
                batch_attempts: 0,
                ..state
            };
            Ok((next, BATCH_POLL_INTERVAL))
        }

        UpgradePhase::InProgress => {
            let upgraded = state.progress.upgraded;
            let ordinals = batch_ordinals(total, upgraded, state.progress.in_progress.max(1));
            let unhealthy = check_batch_health(ctx, cluster, namespace, &ordinals).await?;

            if unhealthy.is_empty() {
                let done = upgraded + state.progress.in_progress;
                if done >= total {
                    info!(cluster = %name, to = %state.target_version, "Rolling upgrade completed");
                    ctx.publish_normal_event(
                        cluster,
                        "UpgradeCompleted",
                        "Upgrading",
                        Some(format!("All {} servers on {}", total, state.target_version)),
                    )
                    .await;
                    let next = UpgradeState {
                        phase: UpgradePhase::Completed,
                        progress: UpgradeProgress::completed(total),
                        unhealthy_servers: Vec::new(),
                        batch_started_at: None,
                        batch_attempts: 0,
                        ..state
                    };
                    return Ok((next, BATCH_POLL_INTERVAL));
                }

                // Advance the partition for the next batch.
                let partition = partition_for(total, done, batch);
                let target = with_partition(desired_sts, partition);
                apply_with_merge(
                    &sts_api,
                    &target,
                    merge_statefulset,
                    ctx.health_state.as_ref(),
                )
                .await?;

                debug!(cluster = %name, upgraded = done, partition, "Batch healthy, advancing");
                let next = UpgradeState {
                    phase: UpgradePhase::InProgress,
                    progress: UpgradeProgress::with_batch(total, done, batch),
                    unhealthy_servers: Vec::new(),
                    batch_started_at: Some(now.to_string()),
                    batch_attempts: 0,
                    ..state
                };
                return Ok((next, BATCH_POLL_INTERVAL));
            }

            // Batch not healthy yet: only escalate after the timeout.
            let timeout = cluster.spec.upgrade_strategy.batch_timeout_seconds as i64;
            let elapsed = batch_elapsed(&state, now).unwrap_or(0);
            if elapsed < timeout {
                return Ok((state, BATCH_POLL_INTERVAL));
            }

            let attempts = state.batch_attempts + 1;
            if attempts >= cluster.spec.upgrade_strategy.health_retries {
                warn!(
                    cluster = %name,
                    unhealthy = ?unhealthy,
                    attempts,
                    "Upgrade batch failed health gate, pausing"
                );
                ctx.publish_warning_event(
                    cluster,
                    reasons::UPGRADE_PAUSED,
                    "Upgrading",
                    Some(format!(
                        "Batch failed health checks {} times; unhealthy: {:?}",
                        attempts, unhealthy
                    )),
                )
                .await;
                let next = UpgradeState {
                    phase: UpgradePhase::Paused,
                    unhealthy_servers: unhealthy,
                    batch_started_at: None,
                    batch_attempts: attempts,
                    ..state
                };
                return Ok((next, PAUSED_POLL_INTERVAL));
            }

            debug!(cluster = %name, attempts, "Batch health timeout, retrying");
            let next = UpgradeState {
                batch_started_at: Some(now.to_string()),
                batch_attempts: attempts,
                ..state
            };
            Ok((next, BATCH_POLL_INTERVAL))
        }

        UpgradePhase::Paused => {
            // Recoverable: resume the moment the failing servers recover.
            let ordinals = batch_ordinals(total, state.progress.upgraded, state.progress.in_progress.max(1));
            let unhealthy = check_batch_health(ctx, cluster, namespace, &ordinals).await?;

            if unhealthy.is_empty() {
                info!(cluster = %name, "Upgrade failure cleared, resuming");
                ctx.publish_normal_event(
                    cluster,
                    "UpgradeResumed",
                    "Upgrading",
                    Some("Health checks passing again, resuming rolling upgrade".to_string()),
                )
                .await;
                let next = UpgradeState {
                    phase: UpgradePhase::InProgress,
                    unhealthy_servers: Vec::new(),
                    batch_started_at: Some(now.to_string()),
                    batch_attempts: 0,
                    ..state
                };
                Ok((next, BATCH_POLL_INTERVAL))
            } else {
                // Stay paused; the standing condition keeps the operator
                // informed, nothing is abandoned.
                let next = UpgradeState {
                    unhealthy_servers: unhealthy,
                    ..state
                };
                Ok((next, PAUSED_POLL_INTERVAL))
            }
        }

        UpgradePhase::Completed | UpgradePhase::Failed => Ok((state, PAUSED_POLL_INTERVAL)),
    }
}

/// Whether the live StatefulSet still carries an upgrade partition that
/// must be cleared after completion.
pub fn needs_partition_reset(live_sts: &StatefulSet) -> bool {
    live_sts
        .spec
        .as_ref()
        .and_then(|s| s.update_strategy.as_ref())
        .and_then(|u| u.rolling_update.as_ref())
        .and_then(|r| r.partition)
        .is_some_and(|p| p > 0)
}
