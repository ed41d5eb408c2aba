//! ConfigMap generation for the rendered neo4j.conf.
//!
//! The ConfigMap body is produced by `config::render`; this builder only
//! wraps it in metadata. Writes are gated by the configuration convergence
//! manager, never issued directly from here.

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::Neo4jCluster;
use crate::resources::common::{
    configmap_name, owner_reference, standard_annotations, standard_labels,
};

/// Key under which neo4j.conf is stored in the ConfigMap.
pub const CONFIG_KEY: &str = "neo4j.conf";

/// Generate the cluster ConfigMap holding the rendered configuration text.
pub fn generate_configmap(cluster: &Neo4jCluster, config_text: &str) -> ConfigMap {
    let labels = standard_labels(cluster);
    let annotations = standard_annotations(cluster);

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(configmap_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some({
            let mut data = BTreeMap::new();
            data.insert(CONFIG_KEY.to_string(), config_text.to_string());
            data
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthSpec, Neo4jClusterSpec, SecretKeyRef};

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
    fn test_generate_configmap() {
        let cluster = test_cluster("graph");
        let cm = generate_configmap(&cluster, "server.memory.heap.max_size=1g\n");

        assert_eq!(cm.metadata.name, Some("graph-config".to_string()));
        let data = cm.data.unwrap();
        assert!(data.get(CONFIG_KEY).unwrap().contains("heap.max_size"));
    }

    #[test]
    fn test_configmap_owner_reference() {
        let cluster = test_cluster("graph");
        let cm = generate_configmap(&cluster, "");
        let owners = cm.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "Neo4jCluster");
        assert_eq!(owners[0].name, "graph");
    }
}
