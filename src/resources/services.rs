//! Service generation for Neo4j clusters.
//!
//! Two services per cluster:
//! - **Discovery Service** (headless): stable per-pod DNS for cluster
//!   discovery, publishes not-ready addresses so formation can start before
//!   all pods pass readiness.
//! - **Client Service**: load-balanced Bolt/HTTP endpoint for applications.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::config::render::{BOLT_PORT, DISCOVERY_PORT, HTTP_PORT, RAFT_PORT};
use crate::crd::Neo4jCluster;
use crate::resources::common::{
    client_service_name, discovery_service_name, owner_reference, pod_selector_labels,
    standard_annotations, standard_labels,
};

/// Generate the headless discovery Service.
pub fn generate_discovery_service(cluster: &Neo4jCluster) -> Service {
    let name = discovery_service_name(cluster);
    let namespace = cluster.namespace();
    let mut labels = standard_labels(cluster);
    labels.insert(
        "app.kubernetes.io/service-type".to_string(),
        "discovery".to_string(),
    );
    let annotations = standard_annotations(cluster);

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace,
            labels: Some(labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            // DNS for pods that are not yet ready: discovery must resolve
            // every member during initial formation
            publish_not_ready_addresses: Some(true),
            selector: Some(pod_selector_labels(cluster)),
            ports: Some(vec![
                ServicePort {
                    port: DISCOVERY_PORT,
                    target_port: Some(IntOrString::String("discovery".to_string())),
                    name: Some("discovery".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    port: RAFT_PORT,
                    target_port: Some(IntOrString::String("raft".to_string())),
                    name: Some("raft".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    port: BOLT_PORT,
                    target_port: Some(IntOrString::String("bolt".to_string())),
                    name: Some("bolt".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the client Service for application access.
pub fn generate_client_service(cluster: &Neo4jCluster) -> Service {
    let name = client_service_name(cluster);
    let namespace = cluster.namespace();
    let mut labels = standard_labels(cluster);
    labels.insert(
        "app.kubernetes.io/service-type".to_string(),
        "client".to_string(),
    );
    let annotations = standard_annotations(cluster);

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace,
            labels: Some(labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(pod_selector_labels(cluster)),
            ports: Some(vec![
                ServicePort {
                    port: BOLT_PORT,
                    target_port: Some(IntOrString::String("bolt".to_string())),
                    name: Some("bolt".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    port: HTTP_PORT,
                    target_port: Some(IntOrString::String("http".to_string())),
                    name: Some("http".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
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
    fn test_generate_discovery_service() {
        let cluster = test_cluster("graph");
        let svc = generate_discovery_service(&cluster);

        assert_eq!(svc.metadata.name, Some("graph-discovery".to_string()));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 3);
        assert!(ports.iter().any(|p| p.name == Some("discovery".to_string())));
        assert!(ports.iter().any(|p| p.name == Some("raft".to_string())));
    }

    #[test]
    fn test_generate_client_service() {
        let cluster = test_cluster("graph");
        let svc = generate_client_service(&cluster);

        assert_eq!(svc.metadata.name, Some("graph".to_string()));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_, Some("ClusterIP".to_string()));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert!(ports.iter().any(|p| p.port == BOLT_PORT));
        assert!(ports.iter().any(|p| p.port == HTTP_PORT));
    }

    #[test]
    fn test_services_select_canonical_labels() {
        let mut cluster = test_cluster("graph");
        cluster
            .spec
            .labels
            .insert("team".to_string(), "data".to_string());

        let svc = generate_client_service(&cluster);
        let selector = svc.spec.unwrap().selector.unwrap();
        assert!(selector.get("team").is_none());
        assert_eq!(
            selector.get("app.kubernetes.io/component"),
            Some(&"neo4j-server".to_string())
        );
    }
}
