//! RBAC generation for server pods.
//!
//! Server pods resolve their peers through the Kubernetes API when using
//! the K8S discovery resolver, so each cluster gets a ServiceAccount with a
//! namespaced Role allowing read-only access to its own Services and Pods.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::Neo4jCluster;
use crate::resources::common::{owner_reference, service_account_name, standard_labels};

/// Generate the ServiceAccount used by server pods.
pub fn generate_service_account(cluster: &Neo4jCluster) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(service_account_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Generate the namespaced Role for discovery lookups.
pub fn generate_role(cluster: &Neo4jCluster) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(service_account_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["".to_string()]),
            resources: Some(vec!["services".to_string(), "pods".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
    }
}

/// Generate the RoleBinding tying the ServiceAccount to the Role.
pub fn generate_role_binding(cluster: &Neo4jCluster) -> RoleBinding {
    let name = service_account_name(cluster);

    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(cluster)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: cluster.namespace(),
            ..Default::default()
        }]),
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
    fn test_generate_service_account() {
        let cluster = test_cluster("graph");
        let sa = generate_service_account(&cluster);
        assert_eq!(sa.metadata.name, Some("graph-server".to_string()));
    }

    #[test]
    fn test_role_is_read_only() {
        let cluster = test_cluster("graph");
        let role = generate_role(&cluster);
        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(!rules[0].verbs.iter().any(|v| v == "create" || v == "delete"));
    }

    #[test]
    fn test_role_binding_links_sa_to_role() {
        let cluster = test_cluster("graph");
        let binding = generate_role_binding(&cluster);
        assert_eq!(binding.role_ref.name, "graph-server");
        let subjects = binding.subjects.unwrap();
        assert_eq!(subjects[0].kind, "ServiceAccount");
        assert_eq!(subjects[0].name, "graph-server");
    }
}
