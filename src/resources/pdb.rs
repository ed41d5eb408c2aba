//! PodDisruptionBudget generation.
//!
//! Voluntary disruptions are capped at the quorum budget: a majority of
//! servers must stay up or the cluster loses write availability.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{Neo4jCluster, quorum_budget};
use crate::resources::common::{owner_reference, pod_selector_labels, standard_labels};

/// Generate a PodDisruptionBudget for the server pods.
pub fn generate_pod_disruption_budget(cluster: &Neo4jCluster) -> PodDisruptionBudget {
    let servers = cluster.spec.topology.servers;
    // At least one pod must be evictable or node drains wedge forever.
    let max_unavailable = quorum_budget(servers).max(1);

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(cluster.name_any()),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(max_unavailable)),
            selector: Some(LabelSelector {
                match_labels: Some(pod_selector_labels(cluster)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
