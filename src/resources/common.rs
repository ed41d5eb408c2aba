//! Common resource generation utilities.
//!
//! Naming conventions, canonical labels, and owner references shared by all
//! builders. Every server pod carries the same label set regardless of the
//! database-level role it ends up with: roles are a data-layer concern and
//! selectors must never depend on them.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::{Neo4jCluster, Neo4jStandalone};

/// Operator identity used in managed-by labels and field manager.
pub const OPERATOR_NAME: &str = "neo4j-operator";

/// Name of the server StatefulSet for a cluster.
pub fn server_statefulset_name(cluster: &Neo4jCluster) -> String {
    format!("{}-server", cluster.name_any())
}

/// Name of the headless discovery Service.
pub fn discovery_service_name(cluster: &Neo4jCluster) -> String {
    format!("{}-discovery", cluster.name_any())
}

/// Name of the client-facing Service.
pub fn client_service_name(cluster: &Neo4jCluster) -> String {
    cluster.name_any()
}

/// Name of the generated ConfigMap.
pub fn configmap_name(cluster: &Neo4jCluster) -> String {
    format!("{}-config", cluster.name_any())
}

/// Name of the backup StatefulSet.
pub fn backup_statefulset_name(cluster: &Neo4jCluster) -> String {
    format!("{}-backup", cluster.name_any())
}

/// Name of the ServiceAccount used by server pods.
pub fn service_account_name(cluster: &Neo4jCluster) -> String {
    format!("{}-server", cluster.name_any())
}

/// DNS name of a server pod within the headless service.
pub fn server_pod_dns(cluster: &Neo4jCluster, namespace: &str, ordinal: i32) -> String {
    format!(
        "{}-{}.{}.{}.svc.cluster.local",
        server_statefulset_name(cluster),
        ordinal,
        discovery_service_name(cluster),
        namespace
    )
}

/// Pod name for a server ordinal.
pub fn server_pod_name(cluster: &Neo4jCluster, ordinal: i32) -> String {
    format!("{}-{}", server_statefulset_name(cluster), ordinal)
}

/// Standard labels applied to all managed resources.
pub fn standard_labels(cluster: &Neo4jCluster) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), cluster.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        OPERATOR_NAME.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "neo4j-server".to_string(),
    );

    // Merge user-defined labels
    for (key, value) in &cluster.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Selector labels identifying server pods.
///
/// One label set for every server: no primary/secondary split here. The
/// StatefulSet selector is immutable, so this set must stay stable for the
/// lifetime of the cluster and must never include user labels.
pub fn pod_selector_labels(cluster: &Neo4jCluster) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), cluster.name_any());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "neo4j-server".to_string(),
    );
    labels
}

/// User-defined annotations from the spec.
pub fn standard_annotations(cluster: &Neo4jCluster) -> BTreeMap<String, String> {
    cluster.spec.annotations.clone()
}

/// Create an owner reference for a Neo4jCluster.
pub fn owner_reference(cluster: &Neo4jCluster) -> OwnerReference {
    OwnerReference {
        api_version: Neo4jCluster::api_version(&()).into_owned(),
        kind: Neo4jCluster::kind(&()).into_owned(),
        name: cluster.name_any(),
        uid: cluster.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Create an owner reference for a Neo4jStandalone.
pub fn standalone_owner_reference(standalone: &Neo4jStandalone) -> OwnerReference {
    OwnerReference {
        api_version: Neo4jStandalone::api_version(&()).into_owned(),
        kind: Neo4jStandalone::kind(&()).into_owned(),
        name: standalone.name_any(),
        uid: standalone.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthSpec, Neo4jClusterSpec, SecretKeyRef};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn test_cluster(name: &str) -> Neo4jCluster {
        Neo4jCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                ..Default::default()
            },
            spec: Neo4jClusterSpec {
                auth: AuthSpec {
                    secret_ref: SecretKeyRef {
                        name: "neo4j-auth".to_string(),
                        ..Default::default()
                    },
                },
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn test_resource_names() {
        let cluster = test_cluster("graph");
        assert_eq!(server_statefulset_name(&cluster), "graph-server");
        assert_eq!(discovery_service_name(&cluster), "graph-discovery");
        assert_eq!(client_service_name(&cluster), "graph");
        assert_eq!(configmap_name(&cluster), "graph-config");
        assert_eq!(backup_statefulset_name(&cluster), "graph-backup");
    }

    #[test]
    fn test_server_pod_dns() {
        let cluster = test_cluster("graph");
        assert_eq!(
            server_pod_dns(&cluster, "prod", 2),
            "graph-server-2.graph-discovery.prod.svc.cluster.local"
        );
    }

    #[test]
    fn test_standard_labels_merges_user_labels() {
        let mut cluster = test_cluster("graph");
        cluster
            .spec
            .labels
            .insert("team".to_string(), "data".to_string());

        let labels = standard_labels(&cluster);
        assert_eq!(labels.get("app.kubernetes.io/name"), Some(&"graph".to_string()));
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by"),
            Some(&"neo4j-operator".to_string())
        );
        assert_eq!(labels.get("team"), Some(&"data".to_string()));
    }

    #[test]
    fn test_selector_labels_exclude_user_labels() {
        let mut cluster = test_cluster("graph");
        cluster
            .spec
            .labels
            .insert("team".to_string(), "data".to_string());

        let selector = pod_selector_labels(&cluster);
        assert!(selector.get("team").is_none());
        assert_eq!(selector.len(), 2);
    }

    #[test]
    fn test_owner_reference() {
        let cluster = test_cluster("graph");
        let owner = owner_reference(&cluster);
        assert_eq!(owner.kind, "Neo4jCluster");
        assert_eq!(owner.name, "graph");
        assert_eq!(owner.controller, Some(true));
    }
}
