//! Topology scheduling.
//!
//! Computes a deterministic placement plan from the desired topology and
//! expresses it as Kubernetes scheduling primitives (topology spread
//! constraints and pod anti-affinity) attached to the generated pod
//! template. The operator never places pods itself; it only emits the
//! constraints the scheduler enforces.
//!
//! Determinism matters: the plan feeds the StatefulSet template, and an
//! unstable plan would defeat the zero-write idempotence law. Zones are
//! sorted before assignment and nothing here depends on invocation order.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, PodAffinityTerm, PodAntiAffinity, TopologySpreadConstraint, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::crd::{AntiAffinityMode, Neo4jCluster, TopologyStatus};
use crate::resources::common::pod_selector_labels;
use crate::resources::statefulset::PodScheduling;

/// Zone topology key used by spread constraints.
pub const ZONE_TOPOLOGY_KEY: &str = "topology.kubernetes.io/zone";

/// One server's planned placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPlacement {
    /// StatefulSet ordinal.
    pub ordinal: i32,
    /// Assigned zone, if zones were configured.
    pub zone: Option<String>,
}

/// Deterministic placement plan for a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPlan {
    /// Per-ordinal assignments, in ordinal order.
    pub assignments: Vec<ServerPlacement>,
    /// Whether distribution is enforced.
    pub enforced: bool,
    /// Sorted zone list the plan was computed from.
    zones: Vec<String>,
}

impl PlacementPlan {
    /// Compute the plan for a cluster spec.
    ///
    /// Zones are sorted, then servers are assigned round-robin by ordinal.
    /// Identical inputs always produce the identical plan.
    pub fn compute(servers: i32, zones: &[String], enforce_distribution: bool) -> Self {
        let mut sorted_zones: Vec<String> = zones.to_vec();
        sorted_zones.sort();

        let assignments = (0..servers)
            .map(|ordinal| ServerPlacement {
                ordinal,
                zone: if sorted_zones.is_empty() {
                    None
                } else {
                    Some(sorted_zones[(ordinal as usize) % sorted_zones.len()].clone())
                },
            })
            .collect();

        Self {
            assignments,
            enforced: enforce_distribution && !sorted_zones.is_empty(),
            zones: sorted_zones,
        }
    }

    /// Compute the plan for a cluster resource.
    pub fn for_cluster(cluster: &Neo4jCluster) -> Self {
        Self::compute(
            cluster.spec.topology.servers,
            &cluster.spec.topology.availability_zones,
            cluster.spec.topology.enforce_distribution,
        )
    }

    /// The largest number of servers any single zone holds.
    pub fn max_servers_per_zone(&self) -> i32 {
        let mut counts: BTreeMap<&str, i32> = BTreeMap::new();
        for placement in &self.assignments {
            if let Some(zone) = &placement.zone {
                *counts.entry(zone.as_str()).or_insert(0) += 1;
            }
        }
        counts.values().copied().max().unwrap_or(0)
    }

    /// Ceiling cap a balanced plan must satisfy: ceil(N/Z).
    pub fn zone_cap(&self) -> i32 {
        if self.zones.is_empty() {
            return 0;
        }
        let n = self.assignments.len() as i32;
        let z = self.zones.len() as i32;
        (n + z - 1) / z
    }

    /// Project the plan into the status sub-object.
    pub fn to_status(&self) -> TopologyStatus {
        TopologyStatus {
            assignments: self
                .assignments
                .iter()
                .map(|p| {
                    format!(
                        "{}={}",
                        p.ordinal,
                        p.zone.as_deref().unwrap_or("unconstrained")
                    )
                })
                .collect(),
            enforced: self.enforced,
        }
    }

    /// Build the scheduling constraints for the pod template.
    ///
    /// The label selector always matches the canonical shared server labels:
    /// every server carries one label set regardless of its database-level
    /// role, so the constraints cover the whole workload.
    pub fn scheduling(
        &self,
        cluster: &Neo4jCluster,
        anti_affinity: AntiAffinityMode,
        topology_key: &str,
    ) -> PodScheduling {
        let selector = LabelSelector {
            match_labels: Some(pod_selector_labels(cluster)),
            ..Default::default()
        };

        // The spread constraint is always emitted; when distribution is not
        // enforced it degrades to ScheduleAnyway so insufficient zones never
        // block cluster formation.
        let when_unsatisfiable = if self.enforced {
            "DoNotSchedule"
        } else {
            "ScheduleAnyway"
        };

        let spread = TopologySpreadConstraint {
            max_skew: 1,
            topology_key: ZONE_TOPOLOGY_KEY.to_string(),
            when_unsatisfiable: when_unsatisfiable.to_string(),
            label_selector: Some(selector.clone()),
            ..Default::default()
        };

        let affinity = match anti_affinity {
            AntiAffinityMode::Required => Affinity {
                pod_anti_affinity: Some(PodAntiAffinity {
                    required_during_scheduling_ignored_during_execution: Some(vec![
                        PodAffinityTerm {
                            label_selector: Some(selector),
                            topology_key: topology_key.to_string(),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
                ..Default::default()
            },
            AntiAffinityMode::Preferred => Affinity {
                pod_anti_affinity: Some(PodAntiAffinity {
                    preferred_during_scheduling_ignored_during_execution: Some(vec![
                        WeightedPodAffinityTerm {
                            weight: 100,
                            pod_affinity_term: PodAffinityTerm {
                                label_selector: Some(selector),
                                topology_key: topology_key.to_string(),
                                ..Default::default()
                            },
                        },
                    ]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        };

        PodScheduling {
            topology_spread_constraints: vec![spread],
            affinity: Some(affinity),
        }
    }
}
