//! Multi-step scenario tests for the convergence engine.
//!
//! Each scenario fabricates the observed state a reconciliation would see
//! and checks the phase sequence, upgrade accounting, and repair decisions.

use crate::mock_state::{MockClusterState, expected_sequences};
use neo4j_operator::client::membership::MembershipView;
use neo4j_operator::controller::change::{Significance, classify_statefulset};
use neo4j_operator::controller::config_convergence::content_hash;
use neo4j_operator::controller::split_brain::{MembershipSnapshot, SplitVerdict, classify};
use neo4j_operator::controller::topology::PlacementPlan;
use neo4j_operator::controller::upgrade::{batch_ordinals, batch_size};
use neo4j_operator::crd::{ClusterPhase, UpgradePhase, UpgradeProgress};

// ============================================================================
// Fresh cluster creation
// ============================================================================

/// Scenario: spec {servers: 3, image: 5.26-enterprise, storage: 10Gi}.
/// Expected: Empty → Initializing → Forming → Ready, no Failed phase ever.
#[test]
fn test_fresh_cluster_lifecycle() {
    let mut state = MockClusterState::fresh("graph", 3);
    assert_eq!(state.name, "graph");
    let mut phases = vec![state.phase];

    // Resources get applied.
    phases.push(state.step());
    assert_eq!(state.phase, ClusterPhase::Initializing);

    // Pods come up and discovery completes.
    state.infrastructure_converges();
    phases.push(state.step());
    assert_eq!(state.phase, ClusterPhase::Forming);
    phases.push(state.step());
    assert_eq!(state.phase, ClusterPhase::Ready);

    assert_eq!(phases, expected_sequences::fresh_creation());
    assert!(!phases.contains(&ClusterPhase::Failed));
}

/// Formation does not complete until every server reports the full view.
#[test]
fn test_forming_waits_for_complete_membership() {
    let mut state = MockClusterState::fresh("graph", 3);
    state.step();
    state.ready_servers = 3;
    state.live_replicas = 3;
    state.step();
    assert_eq!(state.phase, ClusterPhase::Forming);

    // Two of three servers see the full membership: not formed.
    state.members_with_full_view = 2;
    state.step();
    assert_eq!(state.phase, ClusterPhase::Forming);

    state.members_with_full_view = 3;
    state.step();
    assert_eq!(state.phase, ClusterPhase::Ready);
}

// ============================================================================
// Scale-up
// ============================================================================

/// Scenario: Ready cluster at servers=3, spec edited to servers=5.
/// Expected: Scaling, replica count converges to 5, back to Ready.
#[test]
fn test_scale_up_3_to_5() {
    let mut state = MockClusterState::ready("graph", 3);
    let mut phases = vec![state.phase];

    state.set_scale(5);
    phases.push(state.step());
    assert_eq!(state.phase, ClusterPhase::Scaling);

    // StatefulSet catches up.
    state.infrastructure_converges();
    phases.push(state.step());
    assert_eq!(state.phase, ClusterPhase::Ready);

    assert_eq!(phases, expected_sequences::scale());
    assert_eq!(state.live_replicas, 5);
}

/// Scale-up only ever grows the ordinal set: existing pods are never part
/// of the change (the classifier marks a replica-only delta SafeLive).
#[test]
fn test_scale_up_does_not_restart_existing_pods() {
    use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

    let template = PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "neo4j".to_string(),
                image: Some("neo4j:5.26.0-enterprise".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    };
    let live = StatefulSet {
        spec: Some(StatefulSetSpec {
            replicas: Some(3),
            template: template.clone(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let desired = StatefulSet {
        spec: Some(StatefulSetSpec {
            replicas: Some(5),
            template,
            ..Default::default()
        }),
        ..Default::default()
    };

    let report = classify_statefulset(&live, &desired, false);
    assert_eq!(report.significance, Significance::SafeLive);
    assert!(report.scale_only);
}

/// Scale recomputes the placement plan deterministically.
#[test]
fn test_scale_recomputes_placement_plan() {
    let zones = vec!["zone-a".to_string(), "zone-b".to_string(), "zone-c".to_string()];

    let before = PlacementPlan::compute(3, &zones, true);
    let after = PlacementPlan::compute(5, &zones, true);

    assert_eq!(before.assignments.len(), 3);
    assert_eq!(after.assignments.len(), 5);
    // Existing ordinals keep their assignment: no rescheduling churn.
    for i in 0..3 {
        assert_eq!(before.assignments[i], after.assignments[i]);
    }
}

// ============================================================================
// Rolling upgrade
// ============================================================================

/// Quorum-safe batching across the whole upgrade of a 5-server cluster.
#[test]
fn test_upgrade_batches_never_violate_quorum() {
    let total = 5;
    let batch = batch_size(total);
    assert_eq!(batch, 2);

    let mut upgraded = 0;
    while upgraded < total {
        let ordinals = batch_ordinals(total, upgraded, batch);
        assert!(
            ordinals.len() as i32 <= (total - 1) / 2,
            "batch {:?} exceeds quorum budget",
            ordinals
        );
        let progress = UpgradeProgress::with_batch(total, upgraded, batch);
        assert!(progress.is_consistent());
        upgraded += progress.in_progress;
    }
    assert_eq!(upgraded, total);
}

/// Phase sequence: Ready → Upgrading → Ready once batches complete.
#[test]
fn test_upgrade_lifecycle() {
    let mut state = MockClusterState::ready("graph", 3);
    let mut phases = vec![state.phase];

    // Image tag change detected; the orchestrator owns the rollout.
    state.upgrade_phase = Some(UpgradePhase::Pending);
    phases.push(state.step());
    assert_eq!(state.phase, ClusterPhase::Upgrading);

    // Batches in flight.
    state.upgrade_phase = Some(UpgradePhase::InProgress);
    state.step();
    assert_eq!(state.phase, ClusterPhase::Upgrading);

    // All batches healthy.
    state.upgrade_phase = Some(UpgradePhase::Completed);
    phases.push(state.step());
    assert_eq!(state.phase, ClusterPhase::Ready);

    assert_eq!(phases, expected_sequences::upgrade());
}

/// Paused is recoverable: the cluster stays in Upgrading, never Failed,
/// and resumes when the failure clears.
#[test]
fn test_upgrade_pause_is_recoverable() {
    let mut state = MockClusterState::ready("graph", 5);
    state.upgrade_phase = Some(UpgradePhase::Pending);
    state.step();
    assert_eq!(state.phase, ClusterPhase::Upgrading);

    // Health gate fails; upgrade pauses but the phase holds.
    state.upgrade_phase = Some(UpgradePhase::Paused);
    state.step();
    assert_eq!(state.phase, ClusterPhase::Upgrading);

    // Failure clears, batches finish.
    state.upgrade_phase = Some(UpgradePhase::InProgress);
    state.step();
    state.upgrade_phase = Some(UpgradePhase::Completed);
    state.step();
    assert_eq!(state.phase, ClusterPhase::Ready);
}

// ============================================================================
// Conflicting concurrent update
// ============================================================================

/// Two writers race on replicas=4 vs replicas=5 from the same stale base:
/// the loser re-reads and its intent lands exactly, never a blend.
#[test]
fn test_concurrent_writers_last_intent_wins() {
    use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
    use neo4j_operator::controller::applier::merge_statefulset;

    let make = |replicas: i32, version: &str| StatefulSet {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            resource_version: Some(version.to_string()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        ..Default::default()
    };

    let base = make(3, "100");

    // Writer A lands first.
    let mut after_a = base.clone();
    merge_statefulset(&mut after_a, &make(4, ""));
    after_a.metadata.resource_version = Some("101".to_string());

    // Writer B conflicts, re-fetches A's result, re-applies its own intent.
    let mut after_b = after_a.clone();
    merge_statefulset(&mut after_b, &make(5, ""));

    assert_eq!(after_b.spec.as_ref().unwrap().replicas, Some(5));
    assert_eq!(after_b.metadata.resource_version, Some("101".to_string()));
}

// ============================================================================
// Split-brain
// ============================================================================

/// Scenario: 5-server cluster, 2 servers report a membership excluding the
/// other 3. Expected: the 2 are orphaned, the majority untouched.
#[test]
fn test_detected_split_brain_repairs_minority() {
    let mut snapshot = MembershipSnapshot::new();
    for (pod, ids) in [
        ("graph-server-0", vec!["a", "b", "c"]),
        ("graph-server-1", vec!["a", "b", "c"]),
        ("graph-server-2", vec!["a", "b", "c"]),
        ("graph-server-3", vec!["d", "e"]),
        ("graph-server-4", vec!["d", "e"]),
    ] {
        snapshot.insert(
            pod.to_string(),
            MembershipView {
                visible: ids.into_iter().map(String::from).collect(),
                servers: Vec::new(),
            },
        );
    }

    match classify(&snapshot, 5, false) {
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

/// The same disagreement during formation must not orphan anyone.
#[test]
fn test_split_brain_suppressed_during_formation() {
    let mut snapshot = MembershipSnapshot::new();
    for (pod, ids) in [
        ("graph-server-0", vec!["a"]),
        ("graph-server-1", vec!["a", "b"]),
        ("graph-server-2", vec!["c"]),
    ] {
        snapshot.insert(
            pod.to_string(),
            MembershipView {
                visible: ids.into_iter().map(String::from).collect(),
                servers: Vec::new(),
            },
        );
    }

    assert_eq!(classify(&snapshot, 3, true), SplitVerdict::Forming);
}

// ============================================================================
// Idempotence
// ============================================================================

/// Reconciling with no spec change and no drift must classify every write
/// as a no-op: the template delta is NoOp and the config hash is stable.
#[test]
fn test_second_reconciliation_produces_zero_writes() {
    use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

    let build = || StatefulSet {
        spec: Some(StatefulSetSpec {
            replicas: Some(3),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "neo4j".to_string(),
                        image: Some("neo4j:5.26.0-enterprise".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    // First pass creates, second pass rebuilds the identical object.
    let live = build();
    let rebuilt = build();
    let report = classify_statefulset(&live, &rebuilt, false);
    assert_eq!(report.significance, Significance::NoOp);

    // Config text differs only in the generation timestamp: same hash, so
    // the ConfigMap write is skipped too.
    let conf_a = "# generated at 2026-08-06T10:00:00Z\nserver.memory.heap.max_size=1g\n";
    let conf_b = "# generated at 2026-08-06T10:00:30Z\nserver.memory.heap.max_size=1g\n";
    assert_eq!(content_hash(conf_a), content_hash(conf_b));
}
