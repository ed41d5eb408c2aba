//! StatefulSet generation for Neo4j clusters.
//!
//! Creates the server StatefulSet:
//! - Stable network identity via the discovery (headless) service
//! - Persistent storage via PVC templates
//! - Generated neo4j.conf mounted from the cluster ConfigMap
//! - TLS certificate mounts when TLS is configured
//! - Two-phase probe strategy (startup vs liveness)
//! - Scheduling constraints computed by the topology scheduler
//!
//! The pod template is a pure function of the cluster spec plus the
//! scheduling constraints; the StatefulSet is recomputed fresh on every
//! reconciliation and diffed by the change classifier before any write.

use k8s_openapi::api::apps::v1::{
    StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, LocalObjectReference, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecretKeySelector, SecretVolumeSource, SecurityContext, TCPSocketAction,
    TopologySpreadConstraint, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::config::render::{BOLT_PORT, DISCOVERY_PORT, HTTP_PORT, RAFT_PORT};
use crate::crd::Neo4jCluster;
use crate::resources::common::{
    configmap_name, discovery_service_name, owner_reference, pod_selector_labels,
    server_statefulset_name, service_account_name, standard_annotations, standard_labels,
};

/// Neo4j user ID in the official container image.
const NEO4J_USER_ID: i64 = 7474;
/// Grace period allowing a clean database shutdown and checkpoint.
const TERMINATION_GRACE_PERIOD: i64 = 120;

/// Scheduling constraints emitted by the topology scheduler and attached to
/// the pod template. The builders never compute placement themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodScheduling {
    /// Zone spread constraints (maxSkew=1 over the canonical label set).
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
    /// Anti-affinity between server pods.
    pub affinity: Option<Affinity>,
}

/// Generate the server StatefulSet for a Neo4jCluster.
pub fn generate_statefulset(cluster: &Neo4jCluster, scheduling: &PodScheduling) -> StatefulSet {
    let name = server_statefulset_name(cluster);
    let namespace = cluster.namespace();
    let labels = standard_labels(cluster);
    let annotations = standard_annotations(cluster);
    let replicas = cluster.spec.topology.servers;

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: namespace.clone(),
            labels: Some(labels.clone()),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations.clone())
            },
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: Some(discovery_service_name(cluster)),
            selector: LabelSelector {
                match_labels: Some(pod_selector_labels(cluster)),
                ..Default::default()
            },
            // Parallel startup: discovery needs all pods resolvable at once
            pod_management_policy: Some("Parallel".to_string()),
            // RollingUpdate with a partition the upgrade orchestrator moves
            // batch by batch; the controller never relies on the default
            // whole-set rollout.
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            template: generate_pod_template(cluster, scheduling, &labels, &annotations),
            volume_claim_templates: Some(vec![generate_pvc_template(cluster)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the pod template for the StatefulSet.
fn generate_pod_template(
    cluster: &Neo4jCluster,
    scheduling: &PodScheduling,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
) -> PodTemplateSpec {
    let image_pull_secrets = convert_pull_secrets(&cluster.spec.image.pull_secrets);

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations.clone())
            },
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(service_account_name(cluster)),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            security_context: Some(generate_pod_security_context()),
            affinity: scheduling.affinity.clone(),
            topology_spread_constraints: if scheduling.topology_spread_constraints.is_empty() {
                None
            } else {
                Some(scheduling.topology_spread_constraints.clone())
            },
            containers: vec![generate_server_container(cluster)],
            volumes: Some(generate_volumes(cluster)),
            image_pull_secrets,
            ..Default::default()
        }),
    }
}

/// Convert pull_secrets list to LocalObjectReference list.
fn convert_pull_secrets(pull_secrets: &[String]) -> Option<Vec<LocalObjectReference>> {
    if pull_secrets.is_empty() {
        return None;
    }

    Some(
        pull_secrets
            .iter()
            .map(|name| LocalObjectReference { name: name.clone() })
            .collect(),
    )
}

/// Generate pod security context.
fn generate_pod_security_context() -> PodSecurityContext {
    PodSecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(NEO4J_USER_ID),
        fs_group: Some(NEO4J_USER_ID),
        seccomp_profile: Some(k8s_openapi::api::core::v1::SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the main Neo4j server container.
fn generate_server_container(cluster: &Neo4jCluster) -> Container {
    Container {
        name: "neo4j".to_string(),
        image: Some(cluster.spec.image.reference()),
        image_pull_policy: Some(cluster.spec.image.pull_policy.clone()),
        ports: Some(vec![
            ContainerPort {
                container_port: BOLT_PORT,
                name: Some("bolt".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: HTTP_PORT,
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: DISCOVERY_PORT,
                name: Some("discovery".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: RAFT_PORT,
                name: Some("raft".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(generate_env_vars(cluster)),
        resources: Some(generate_resource_requirements(cluster)),
        volume_mounts: Some(generate_volume_mounts(cluster)),
        security_context: Some(generate_container_security_context()),
        startup_probe: Some(generate_startup_probe()),
        liveness_probe: Some(generate_liveness_probe()),
        readiness_probe: Some(generate_readiness_probe()),
        ..Default::default()
    }
}

/// Generate environment variables for the server container.
fn generate_env_vars(cluster: &Neo4jCluster) -> Vec<EnvVar> {
    vec![
        // Pod identity via downward API; the generated config references it
        // as $(POD_NAME) for advertised addresses.
        EnvVar {
            name: "POD_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        // Initial password, formatted neo4j/<password> by the image entrypoint
        EnvVar {
            name: "NEO4J_AUTH_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: cluster.spec.auth.secret_ref.name.clone(),
                    key: cluster.spec.auth.secret_ref.key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVar {
            name: "NEO4J_AUTH".to_string(),
            value: Some("neo4j/$(NEO4J_AUTH_PASSWORD)".to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "NEO4J_ACCEPT_LICENSE_AGREEMENT".to_string(),
            value: Some("yes".to_string()),
            ..Default::default()
        },
        // Enables $(...) expansion inside the mounted neo4j.conf
        EnvVar {
            name: "EXTENDED_CONF".to_string(),
            value: Some("yes".to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "NEO4J_CONF".to_string(),
            value: Some("/config".to_string()),
            ..Default::default()
        },
    ]
}

/// Generate resource requirements from the spec.
fn generate_resource_requirements(cluster: &Neo4jCluster) -> ResourceRequirements {
    ResourceRequirements {
        limits: Some({
            let mut limits = BTreeMap::new();
            limits.insert(
                "cpu".to_string(),
                Quantity(cluster.spec.resources.limits.cpu.clone()),
            );
            limits.insert(
                "memory".to_string(),
                Quantity(cluster.spec.resources.limits.memory.clone()),
            );
            limits
        }),
        requests: Some({
            let mut requests = BTreeMap::new();
            requests.insert(
                "cpu".to_string(),
                Quantity(cluster.spec.resources.requests.cpu.clone()),
            );
            requests.insert(
                "memory".to_string(),
                Quantity(cluster.spec.resources.requests.memory.clone()),
            );
            requests
        }),
        ..Default::default()
    }
}

/// Generate container security context.
fn generate_container_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(false), // Neo4j writes to /data and /logs
        run_as_non_root: Some(true),
        run_as_user: Some(NEO4J_USER_ID),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate startup probe.
///
/// High failure threshold: store recovery after an unclean shutdown can take
/// minutes on large datasets.
fn generate_startup_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/".to_string()),
            port: IntOrString::String("http".to_string()),
            ..Default::default()
        }),
        failure_threshold: Some(60),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

/// Generate liveness probe: the Bolt listener answers even while the server
/// is catching up, so a TCP check avoids restart loops during recovery.
fn generate_liveness_probe() -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::String("bolt".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(30),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

/// Generate readiness probe against the HTTP endpoint.
fn generate_readiness_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/".to_string()),
            port: IntOrString::String("http".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        success_threshold: Some(1),
        ..Default::default()
    }
}

/// Generate volumes for the pod.
fn generate_volumes(cluster: &Neo4jCluster) -> Vec<Volume> {
    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: configmap_name(cluster),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if cluster.spec.tls.is_some() {
        volumes.push(Volume {
            name: "tls-certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(format!("{}-tls", cluster.name_any())),
                default_mode: Some(0o400),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    volumes
}

/// Generate volume mounts for the container.
fn generate_volume_mounts(cluster: &Neo4jCluster) -> Vec<VolumeMount> {
    let mut mounts = vec![
        VolumeMount {
            name: "data".to_string(),
            mount_path: "/data".to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "config".to_string(),
            mount_path: "/config".to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    ];

    if cluster.spec.tls.is_some() {
        mounts.push(VolumeMount {
            name: "tls-certs".to_string(),
            mount_path: "/ssl".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    mounts
}

/// Generate PVC template for the StatefulSet.
fn generate_pvc_template(cluster: &Neo4jCluster) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: cluster.spec.storage.class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some({
                    let mut requests = BTreeMap::new();
                    requests.insert(
                        "storage".to_string(),
                        Quantity(cluster.spec.storage.size.clone()),
                    );
                    requests
                }),
                ..Default::default()
            }),
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
    fn test_generate_statefulset() {
        let cluster = test_cluster("graph");
        let sts = generate_statefulset(&cluster, &PodScheduling::default());

        assert_eq!(sts.metadata.name, Some("graph-server".to_string()));
        assert_eq!(sts.metadata.namespace, Some("default".to_string()));

        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.service_name, Some("graph-discovery".to_string()));
        assert_eq!(spec.pod_management_policy, Some("Parallel".to_string()));
        assert_eq!(
            spec.update_strategy.unwrap().type_,
            Some("RollingUpdate".to_string())
        );
    }

    #[test]
    fn test_statefulset_selector_uses_canonical_labels() {
        let mut cluster = test_cluster("graph");
        cluster
            .spec
            .labels
            .insert("team".to_string(), "data".to_string());
        let sts = generate_statefulset(&cluster, &PodScheduling::default());

        let selector = sts.spec.unwrap().selector.match_labels.unwrap();
        assert_eq!(
            selector.get("app.kubernetes.io/name"),
            Some(&"graph".to_string())
        );
        // User labels never leak into the immutable selector.
        assert!(selector.get("team").is_none());
    }

    #[test]
    fn test_statefulset_image() {
        let mut cluster = test_cluster("graph");
        cluster.spec.image.tag = "5.26.0-enterprise".to_string();
        let sts = generate_statefulset(&cluster, &PodScheduling::default());

        let template = sts.spec.unwrap().template;
        let container = &template.spec.unwrap().containers[0];
        assert_eq!(container.image, Some("neo4j:5.26.0-enterprise".to_string()));
    }

    #[test]
    fn test_tls_volume_only_when_configured() {
        let cluster = test_cluster("graph");
        let sts = generate_statefulset(&cluster, &PodScheduling::default());
        let volumes = sts.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        assert!(!volumes.iter().any(|v| v.name == "tls-certs"));

        let mut tls_cluster = test_cluster("graph");
        tls_cluster.spec.tls = Some(crate::crd::TlsSpec {
            issuer_ref: crate::crd::IssuerRef {
                name: "ca-issuer".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        let sts = generate_statefulset(&tls_cluster, &PodScheduling::default());
        let volumes = sts.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        assert!(volumes.iter().any(|v| v.name == "tls-certs"));
    }

    #[test]
    fn test_pvc_template() {
        let cluster = test_cluster("graph");
        let sts = generate_statefulset(&cluster, &PodScheduling::default());
        let pvcs = sts.spec.unwrap().volume_claim_templates.unwrap();

        assert_eq!(pvcs.len(), 1);
        assert_eq!(pvcs[0].metadata.name, Some("data".to_string()));
        let requests = pvcs[0]
            .spec
            .as_ref()
            .unwrap()
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("10Gi".to_string())));
    }

    #[test]
    fn test_scheduling_constraints_attached() {
        let cluster = test_cluster("graph");
        let scheduling = PodScheduling {
            topology_spread_constraints: vec![TopologySpreadConstraint {
                max_skew: 1,
                topology_key: "topology.kubernetes.io/zone".to_string(),
                when_unsatisfiable: "DoNotSchedule".to_string(),
                ..Default::default()
            }],
            affinity: None,
        };
        let sts = generate_statefulset(&cluster, &scheduling);

        let constraints = sts
            .spec
            .unwrap()
            .template
            .spec
            .unwrap()
            .topology_spread_constraints
            .unwrap();
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].max_skew, 1);
    }
}
