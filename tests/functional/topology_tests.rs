//! Topology and convergence property tests across cluster sizes.

use neo4j_operator::controller::config_convergence::{content_hash, diff};
use neo4j_operator::controller::topology::PlacementPlan;
use neo4j_operator::controller::upgrade::batch_size;
use neo4j_operator::crd::quorum_budget;

/// Topology determinism: identical inputs give byte-identical plans, for
/// every (N, zones, enforce) combination we support.
#[test]
fn test_placement_determinism_across_sizes() {
    let zone_sets: Vec<Vec<String>> = vec![
        vec![],
        vec!["zone-a".to_string()],
        vec!["zone-a".to_string(), "zone-b".to_string()],
        vec![
            "zone-a".to_string(),
            "zone-b".to_string(),
            "zone-c".to_string(),
        ],
    ];

    for servers in 1..=11 {
        for zones in &zone_sets {
            for enforce in [false, true] {
                let a = PlacementPlan::compute(servers, zones, enforce);
                let b = PlacementPlan::compute(servers, zones, enforce);
                assert_eq!(a, b, "plan unstable for n={} zones={:?}", servers, zones);
            }
        }
    }
}

/// Zone cap: with enforced distribution, no zone holds more than ceil(N/Z).
#[test]
fn test_zone_cap_holds_for_all_sizes() {
    let zones = vec![
        "zone-a".to_string(),
        "zone-b".to_string(),
        "zone-c".to_string(),
    ];

    for servers in 1..=11 {
        let plan = PlacementPlan::compute(servers, &zones, true);
        assert!(
            plan.max_servers_per_zone() <= plan.zone_cap(),
            "cap violated for {} servers",
            servers
        );
    }
}

/// Quorum math lines up between the budget, the PDB and upgrade batching.
#[test]
fn test_quorum_budget_consistency() {
    for servers in 2..=11 {
        let budget = quorum_budget(servers);
        let batch = batch_size(servers);

        // The upgrade batch never exceeds the quorum budget (except the
        // minimum-progress case where the budget is zero).
        if budget > 0 {
            assert!(batch <= budget, "batch exceeds budget for {} servers", servers);
        } else {
            assert_eq!(batch, 1);
        }

        // Majority always survives the budget being offline.
        let survivors = servers - budget;
        assert!(survivors > servers / 2);
    }
}

/// Config hash properties across representative edits.
#[test]
fn test_config_hash_properties() {
    let base = "\
server.memory.heap.max_size=2g
server.memory.pagecache.size=4g
dbms.cluster.discovery.endpoints=graph-server-0.graph-discovery.ns.svc:5000,graph-server-1.graph-discovery.ns.svc:5000,graph-server-2.graph-discovery.ns.svc:5000
";

    // Reordering lines is cosmetic.
    let reordered = "\
dbms.cluster.discovery.endpoints=graph-server-0.graph-discovery.ns.svc:5000,graph-server-1.graph-discovery.ns.svc:5000,graph-server-2.graph-discovery.ns.svc:5000
server.memory.pagecache.size=4g
server.memory.heap.max_size=2g
";
    assert_eq!(content_hash(base), content_hash(reordered));

    // A real value change is semantic.
    let resized = base.replace("2g", "4g");
    assert_ne!(content_hash(base), content_hash(&resized));
    assert!(diff(base, &resized).restart_required);
}
