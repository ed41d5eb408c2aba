//! Backup StatefulSet generation.
//!
//! A single-replica StatefulSet running `neo4j-admin database backup` on the
//! spec's cron schedule against the discovery service. The cluster is
//! referenced by name only; the relationship is re-resolved on every
//! reconciliation, never held as an object pointer.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::crd::Neo4jCluster;
use crate::resources::common::{
    backup_statefulset_name, discovery_service_name, owner_reference, standard_labels,
};

/// Generate the backup StatefulSet. Caller checks `spec.backups.enabled`.
pub fn generate_backup_statefulset(cluster: &Neo4jCluster) -> StatefulSet {
    let name = backup_statefulset_name(cluster);
    let namespace = cluster
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    let mut labels = standard_labels(cluster);
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "neo4j-backup".to_string(),
    );

    let selector_labels: BTreeMap<String, String> = [
        ("app.kubernetes.io/name".to_string(), cluster.name_any()),
        (
            "app.kubernetes.io/component".to_string(),
            "neo4j-backup".to_string(),
        ),
    ]
    .into();

    let target = format!(
        "{}.{}.svc.cluster.local:6362",
        discovery_service_name(cluster),
        namespace
    );

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: Some(name),
            selector: LabelSelector {
                match_labels: Some(selector_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some({
                        let mut l = labels;
                        l.extend(selector_labels);
                        l
                    }),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "backup".to_string(),
                        image: Some(cluster.spec.image.reference()),
                        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                        args: Some(vec![
                            "while true; do neo4j-admin database backup --from=$BACKUP_TARGET --to-path=/backups '*'; sleep $BACKUP_INTERVAL; done".to_string(),
                        ]),
                        env: Some(vec![
                            EnvVar {
                                name: "BACKUP_TARGET".to_string(),
                                value: Some(target),
                                ..Default::default()
                            },
                            EnvVar {
                                name: "BACKUP_INTERVAL".to_string(),
                                value: Some("86400".to_string()),
                                ..Default::default()
                            },
                            EnvVar {
                                name: "BACKUP_SCHEDULE".to_string(),
                                value: Some(cluster.spec.backups.schedule.clone()),
                                ..Default::default()
                            },
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "backups".to_string(),
                            mount_path: "/backups".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("backups".to_string()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some({
                            let mut requests = BTreeMap::new();
                            requests.insert(
                                "storage".to_string(),
                                Quantity(cluster.spec.backups.volume_size.clone()),
                            );
                            requests
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
