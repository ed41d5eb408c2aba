//! Split-brain detection and repair.
//!
//! A periodic tick, independent of the main reconciliation, queries each
//! server pod individually (never through the load-balanced client service)
//! for its local view of cluster membership. Views are partitioned into
//! equivalence classes by membership-set content:
//!
//! - one class: healthy, no action
//! - multiple classes with one strictly largest: the majority is
//!   authoritative; every server in a minority class is orphaned and its
//!   pod is deleted so the StatefulSet recreates it into the majority
//! - formation still in progress: incomplete views are expected and benign,
//!   no server is ever classified as orphaned
//! - no strict majority: no repair; surfaced as a standing condition
//!
//! Repair is best-effort self-healing, retried with backoff; persistent
//! splits remain visible for operator attention.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::{Api, ResourceExt};
use tracing::{debug, info, warn};

use crate::client::{BoltClient, BoltConfig, MembershipView, fetch_membership_view};
use crate::config::render::BOLT_PORT;
use crate::controller::auth::get_auth_password;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{patch_status_with_retry, upsert_condition};
use crate::crd::{ClusterPhase, Condition, Neo4jCluster, reasons};
use crate::resources::common::{server_pod_dns, server_pod_name};

/// Interval between detection cycles.
pub const DETECTION_INTERVAL: Duration = Duration::from_secs(60);

/// Per-reconciliation snapshot of membership views, keyed by pod name.
/// Ephemeral: used only to decide a repair action, never persisted.
pub type MembershipSnapshot = BTreeMap<String, MembershipView>;

/// Verdict for one detection cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitVerdict {
    /// All reachable servers agree on membership.
    Healthy,
    /// Formation in progress; disagreement is expected and benign.
    Forming,
    /// Confirmed split: the named pods are in minority partitions.
    Split {
        /// Pods to restart, in deterministic order.
        orphaned: Vec<String>,
        /// Number of servers in the authoritative partition.
        majority_size: usize,
    },
    /// Multiple partitions with no strict majority; repair would be a
    /// guess, so none is attempted.
    NoMajority,
}

/// Partition the snapshot into equivalence classes and decide a verdict.
///
/// `expected_servers` is the desired server count; `forming` is true while
/// the cluster phase has not reached Ready for the current topology.
pub fn classify(snapshot: &MembershipSnapshot, expected_servers: i32, forming: bool) -> SplitVerdict {
    if forming {
        // A forming cluster legitimately reports partial views; repairing
        // here would fight the bootstrap.
        return SplitVerdict::Forming;
    }

    if snapshot.is_empty() {
        return SplitVerdict::Healthy;
    }

    // Equivalence classes keyed by the reported membership set.
    let mut classes: BTreeMap<BTreeSet<String>, Vec<String>> = BTreeMap::new();
    for (pod, view) in snapshot {
        classes
            .entry(view.visible.clone())
            .or_default()
            .push(pod.clone());
    }

    if classes.len() == 1 {
        return SplitVerdict::Healthy;
    }

    // A startup transient can also look like disagreement when a server
    // has not caught up yet: a view that is a strict subset of another
    // class's view while still growing. Only treat the disagreement as a
    // split once every view is stable in size (all report at least a
    // majority of the expected membership).
    let majority_threshold = (expected_servers as usize / 2) + 1;

    let (largest_set, largest_members) = classes
        .iter()
        .max_by_key(|(_, members)| members.len())
        .map(|(set, members)| (set.clone(), members.clone()))
        .unwrap_or_default();

    let strictly_largest = classes
        .iter()
        .filter(|(set, _)| **set != largest_set)
        .all(|(_, members)| members.len() < largest_members.len());

    if !strictly_largest {
        return SplitVerdict::NoMajority;
    }

    if largest_members.len() < majority_threshold {
        // Even the biggest partition lacks quorum; restarting the rest
        // cannot produce a writable cluster.
        return SplitVerdict::NoMajority;
    }

    let orphaned: Vec<String> = classes
        .iter()
        .filter(|(set, _)| **set != largest_set)
        .flat_map(|(_, members)| members.iter().cloned())
        .collect();

    SplitVerdict::Split {
        orphaned,
        majority_size: largest_members.len(),
    }
}

/// Collect each pod's local membership view over Bolt.
pub(crate) async fn collect_snapshot(
    ctx: &Context,
    cluster: &Neo4jCluster,
    namespace: &str,
) -> Result<MembershipSnapshot> {
    let password = get_auth_password(&ctx.client, namespace, &cluster.spec.auth.secret_ref)
        .await?
        .ok_or_else(|| Error::Neo4j("auth secret not available".to_string()))?;

    let mut snapshot = MembershipSnapshot::new();
    for ordinal in 0..cluster.spec.topology.servers {
        let pod = server_pod_name(cluster, ordinal);
        let host = server_pod_dns(cluster, namespace, ordinal);
        let config = BoltConfig::for_endpoint(&host, BOLT_PORT, &password);

        match BoltClient::connect(&config).await {
            Ok(client) => match fetch_membership_view(&client).await {
                Ok(view) => {
                    snapshot.insert(pod, view);
                }
                Err(e) => {
                    debug!(pod = %pod, error = %e, "Membership query failed, skipping pod this cycle");
                }
            },
            Err(e) => {
                debug!(pod = %pod, error = %e, "Connection failed, skipping pod this cycle");
            }
        }
    }

    Ok(snapshot)
}

/// Delete the orphaned pods; the StatefulSet recreates them and they rejoin
/// the majority partition.
async fn repair(ctx: &Context, namespace: &str, orphaned: &[String]) -> Result<()> {
    let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    for pod in orphaned {
        info!(pod = %pod, "Restarting orphaned server pod");
        match pod_api.delete(pod, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(Error::Kube(e)),
        }
    }
    Ok(())
}

/// Run one detection cycle for a cluster.
///
/// Holds the per-cluster guard so the cycle never races an in-flight
/// reconciliation for the same cluster.
pub async fn run_detection_cycle(ctx: &Context, cluster: &Neo4jCluster) -> Result<SplitVerdict> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let key = format!("{}/{}", namespace, cluster.name_any());

    let guard = ctx.guard_for(&key).await;
    let _held = guard.lock().await;

    let phase = cluster
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or(ClusterPhase::Empty);
    let forming = phase != ClusterPhase::Ready;

    let snapshot = collect_snapshot(ctx, cluster, &namespace).await?;
    let verdict = classify(&snapshot, cluster.spec.topology.servers, forming);
    let api: Api<Neo4jCluster> = Api::namespaced(ctx.client.clone(), &namespace);
    let generation = cluster.metadata.generation;

    match &verdict {
        SplitVerdict::Split {
            orphaned,
            majority_size,
        } => {
            warn!(
                cluster = %key,
                majority = majority_size,
                orphaned = ?orphaned,
                "Split-brain detected, restarting minority partition"
            );
            ctx.publish_warning_event(
                cluster,
                reasons::SPLIT_BRAIN_DETECTED,
                "SplitBrainRepair",
                Some(format!(
                    "Minority partition {:?} out of sync with {}-server majority; restarting",
                    orphaned, majority_size
                )),
            )
            .await;
            repair(ctx, &namespace, orphaned).await?;

            let message = format!("Restarted minority partition {:?}", orphaned);
            patch_status_with_retry(&api, &cluster.name_any(), move |status| {
                upsert_condition(
                    &mut status.conditions,
                    Condition::split_brain(true, reasons::SPLIT_BRAIN_DETECTED, &message, generation),
                );
            })
            .await?;
        }
        SplitVerdict::NoMajority => {
            // Standing condition for operator attention; self-healing would
            // be a guess without a strict majority.
            warn!(cluster = %key, "Membership disagreement without a strict majority; not repairing");
            patch_status_with_retry(&api, &cluster.name_any(), move |status| {
                upsert_condition(
                    &mut status.conditions,
                    Condition::split_brain(
                        true,
                        reasons::SPLIT_BRAIN_DETECTED,
                        "Membership partitions with no strict majority",
                        generation,
                    ),
                );
            })
            .await?;
        }
        SplitVerdict::Healthy => {
            debug!(cluster = %key, "Membership check passed");
            // Clear the standing condition once views agree again.
            let stale = cluster
                .status
                .as_ref()
                .map(|s| {
                    s.conditions
                        .iter()
                        .any(|c| c.r#type == "SplitBrain" && c.status == "True")
                })
                .unwrap_or(false);
            if stale {
                patch_status_with_retry(&api, &cluster.name_any(), move |status| {
                    upsert_condition(
                        &mut status.conditions,
                        Condition::split_brain(false, "MembershipAgreed", "All views agree", generation),
                    );
                })
                .await?;
            }
        }
        SplitVerdict::Forming => {
            debug!(cluster = %key, "Formation in progress, membership disagreement is benign");
        }
    }

    Ok(verdict)
}

/// Background monitor: ticks over all clusters on a fixed interval.
///
/// Runs for the life of the process; per-cluster state dies with the
/// cluster via `Context::forget_cluster`.
pub async fn run_split_brain_monitor(ctx: Arc<Context>, namespace: Option<String>) {
    let api: Api<Neo4jCluster> = match &namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };

    let mut interval = tokio::time::interval(DETECTION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let clusters = match api.list(&Default::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(error = %e, "Failed to list clusters for split-brain check");
                continue;
            }
        };

        for cluster in clusters {
            // Only probe clusters that have finished forming at least once.
            let ready = cluster
                .status
                .as_ref()
                .map(|s| s.phase == ClusterPhase::Ready)
                .unwrap_or(false);
            if !ready || cluster.metadata.deletion_timestamp.is_some() {
                continue;
            }

            if let Err(e) = run_detection_cycle(&ctx, &cluster).await {
                debug!(
                    cluster = %cluster.name_any(),
                    error = %e,
                    "Detection cycle skipped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::membership::MembershipView;

    fn view(ids: &[&str]) -> MembershipView {
        MembershipView {
            visible: ids.iter().map(|s| s.to_string()).collect(),
            servers: Vec::new(),
        }
    }

    fn snapshot(entries: &[(&str, &[&str])]) -> MembershipSnapshot {
        entries
            .iter()
            .map(|(pod, ids)| (pod.to_string(), view(ids)))
            .collect()
    }

    #[test]
    fn test_agreement_is_healthy() {
        let snap = snapshot(&[
            ("graph-server-0", &["a", "b", "c"]),
            ("graph-server-1", &["a", "b", "c"]),
            ("graph-server-2", &["a", "b", "c"]),
        ]);
        assert_eq!(classify(&snap, 3, false), SplitVerdict::Healthy);
    }

    #[test]
    fn test_forming_never_orphans() {
        // Partial, disagreeing views during formation: benign.
        let snap = snapshot(&[
            ("graph-server-0", &["a"]),
            ("graph-server-1", &["a", "b"]),
            ("graph-server-2", &[]),
        ]);
        assert_eq!(classify(&snap, 3, true), SplitVerdict::Forming);
    }

    #[test]
    fn test_minority_partition_orphaned() {
        // 5-server cluster: 2 servers see only each other, 3 see each other.
        let snap = snapshot(&[
            ("graph-server-0", &["a", "b", "c"]),
            ("graph-server-1", &["a", "b", "c"]),
            ("graph-server-2", &["a", "b", "c"]),
            ("graph-server-3", &["d", "e"]),
            ("graph-server-4", &["d", "e"]),
        ]);

        match classify(&snap, 5, false) {
            SplitVerdict::Split {
                orphaned,
                majority_size,
            } => {
                assert_eq!(majority_size, 3);
                assert_eq!(orphaned, vec!["graph-server-3", "graph-server-4"]);
            }
            other => panic!("expected Split, got {:?}", other),
        }
    }

    #[test]
    fn test_majority_left_untouched() {
        let snap = snapshot(&[
            ("graph-server-0", &["a", "b", "c"]),
            ("graph-server-1", &["a", "b", "c"]),
            ("graph-server-2", &["a", "b", "c"]),
            ("graph-server-3", &["d", "e"]),
            ("graph-server-4", &["d", "e"]),
        ]);

        if let SplitVerdict::Split { orphaned, .. } = classify(&snap, 5, false) {
            assert!(!orphaned.contains(&"graph-server-0".to_string()));
            assert!(!orphaned.contains(&"graph-server-1".to_string()));
            assert!(!orphaned.contains(&"graph-server-2".to_string()));
        } else {
            panic!("expected Split");
        }
    }

    #[test]
    fn test_tied_partitions_not_repaired() {
        // 2 vs 2: no strict majority, repair would be a guess.
        let snap = snapshot(&[
            ("graph-server-0", &["a", "b"]),
            ("graph-server-1", &["a", "b"]),
            ("graph-server-2", &["c", "d"]),
            ("graph-server-3", &["c", "d"]),
        ]);
        assert_eq!(classify(&snap, 4, false), SplitVerdict::NoMajority);
    }

    #[test]
    fn test_largest_partition_below_quorum_not_repaired() {
        // 5 expected, but the largest agreeing group is only 2: restarting
        // the others cannot produce a writable cluster.
        let snap = snapshot(&[
            ("graph-server-0", &["a", "b"]),
            ("graph-server-1", &["a", "b"]),
            ("graph-server-2", &["c"]),
        ]);
        assert_eq!(classify(&snap, 5, false), SplitVerdict::NoMajority);
    }

    #[test]
    fn test_empty_snapshot_is_healthy() {
        // Nothing reachable: connection problems are handled elsewhere.
        assert_eq!(classify(&MembershipSnapshot::new(), 3, false), SplitVerdict::Healthy);
    }

    #[test]
    fn test_orphan_order_deterministic() {
        let snap = snapshot(&[
            ("graph-server-4", &["d", "e"]),
            ("graph-server-3", &["d", "e"]),
            ("graph-server-0", &["a", "b", "c"]),
            ("graph-server-1", &["a", "b", "c"]),
            ("graph-server-2", &["a", "b", "c"]),
        ]);

        let first = classify(&snap, 5, false);
        let second = classify(&snap, 5, false);
        assert_eq!(first, second);
    }
}
