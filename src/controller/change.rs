//! Change significance classification.
//!
//! Compares the live StatefulSet against the freshly-built desired one and
//! decides what the delta means for running pods. This is what makes the
//! reconciliation loop idempotent: identical templates classify as `NoOp`
//! and produce zero writes.

use k8s_openapi::api::apps::v1::StatefulSet;

/// What a detected delta means for the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Significance {
    /// Nothing to do; the write is skipped entirely.
    NoOp,
    /// Safe to apply without touching running pods (e.g. replica count,
    /// object-level labels).
    SafeLive,
    /// Applying restarts pods; must go through the rolling machinery.
    RequiresRollingRestart,
    /// Restart-requiring change arrived while the cluster is still forming;
    /// deferred until formation completes.
    BlockedDuringFormation,
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Significance::NoOp => write!(f, "NoOp"),
            Significance::SafeLive => write!(f, "SafeLive"),
            Significance::RequiresRollingRestart => write!(f, "RequiresRollingRestart"),
            Significance::BlockedDuringFormation => write!(f, "BlockedDuringFormation"),
        }
    }
}

/// Classification result with the evidence behind it.
#[derive(Debug, Clone)]
pub struct ChangeReport {
    /// The classification.
    pub significance: Significance,
    /// Mutable fields that differ (for logs and events).
    pub changed_fields: Vec<String>,
    /// Immutable fields that differ. These are never submitted; a diff here
    /// is reported but treated as a no-op, not an error.
    pub ignored_immutable: Vec<String>,
    /// Whether the image changed (delegates to the upgrade orchestrator).
    pub image_changed: bool,
    /// Whether only the replica count changed (scale operation).
    pub scale_only: bool,
}

impl ChangeReport {
    fn no_op() -> Self {
        Self {
            significance: Significance::NoOp,
            changed_fields: Vec::new(),
            ignored_immutable: Vec::new(),
            image_changed: false,
            scale_only: false,
        }
    }
}

fn container_image(sts: &StatefulSet) -> Option<&str> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .as_deref()
}

fn as_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Classify the delta between the live and desired StatefulSets.
///
/// `forming` is true while the cluster has not finished initial formation;
/// restart-requiring changes are deferred in that window because a restart
/// would reset discovery before a stable membership ever existed.
pub fn classify_statefulset(
    live: &StatefulSet,
    desired: &StatefulSet,
    forming: bool,
) -> ChangeReport {
    let mut changed = Vec::new();
    let mut ignored = Vec::new();

    let live_spec = live.spec.as_ref();
    let desired_spec = desired.spec.as_ref();

    // Immutable fields: diffs recorded but never submitted.
    let immutable_pairs = [
        (
            "spec.selector",
            as_json(&live_spec.map(|s| &s.selector)),
            as_json(&desired_spec.map(|s| &s.selector)),
        ),
        (
            "spec.serviceName",
            as_json(&live_spec.and_then(|s| s.service_name.as_ref())),
            as_json(&desired_spec.and_then(|s| s.service_name.as_ref())),
        ),
        (
            "spec.volumeClaimTemplates",
            as_json(&live_spec.and_then(|s| s.volume_claim_templates.as_ref())),
            as_json(&desired_spec.and_then(|s| s.volume_claim_templates.as_ref())),
        ),
    ];
    for (name, live_value, desired_value) in immutable_pairs {
        if live_value != desired_value {
            ignored.push(name.to_string());
        }
    }

    // Replica count: safe to apply live.
    let live_replicas = live_spec.and_then(|s| s.replicas);
    let desired_replicas = desired_spec.and_then(|s| s.replicas);
    let replicas_changed = live_replicas != desired_replicas;
    if replicas_changed {
        changed.push("spec.replicas".to_string());
    }

    // Image: restart-requiring, handled by the upgrade orchestrator.
    let image_changed = container_image(live) != container_image(desired);
    if image_changed {
        changed.push("spec.template.containers[0].image".to_string());
    }

    // Remaining pod template content: env, resources, probes, volumes,
    // scheduling constraints, template metadata. Compare with the image
    // removed so it is not double-counted.
    let strip_image = |sts: &StatefulSet| -> serde_json::Value {
        let mut value = as_json(&sts.spec.as_ref().map(|s| &s.template));
        if let Some(containers) = value
            .pointer_mut("/spec/containers")
            .and_then(|c| c.as_array_mut())
        {
            for container in containers {
                if let Some(obj) = container.as_object_mut() {
                    obj.remove("image");
                }
            }
        }
        value
    };
    let template_changed = strip_image(live) != strip_image(desired);
    if template_changed {
        changed.push("spec.template".to_string());
    }

    // Object-level labels/annotations: safe to apply live.
    let metadata_changed = as_json(&live.metadata.labels) != as_json(&desired.metadata.labels)
        || as_json(&live.metadata.annotations) != as_json(&desired.metadata.annotations);
    if metadata_changed {
        changed.push("metadata".to_string());
    }

    let restart_required = image_changed || template_changed;

    let significance = if restart_required {
        if forming {
            Significance::BlockedDuringFormation
        } else {
            Significance::RequiresRollingRestart
        }
    } else if replicas_changed || metadata_changed {
        Significance::SafeLive
    } else if changed.is_empty() {
        return ChangeReport {
            ignored_immutable: ignored,
            ..ChangeReport::no_op()
        };
    } else {
        Significance::SafeLive
    };

    ChangeReport {
        significance,
        scale_only: replicas_changed && !restart_required && !metadata_changed,
        changed_fields: changed,
        ignored_immutable: ignored,
        image_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
    use std::collections::BTreeMap;

    fn base_sts(replicas: i32, image: &str) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                name: Some("graph-server".to_string()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                service_name: Some("graph-discovery".to_string()),
                selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        "app.kubernetes.io/name".to_string(),
                        "graph".to_string(),
                    )])),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "neo4j".to_string(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_is_noop() {
        let live = base_sts(3, "neo4j:5.26.0-enterprise");
        let desired = base_sts(3, "neo4j:5.26.0-enterprise");

        let report = classify_statefulset(&live, &desired, false);
        assert_eq!(report.significance, Significance::NoOp);
        assert!(report.changed_fields.is_empty());
    }

    #[test]
    fn test_noop_is_idempotent_across_calls() {
        let live = base_sts(3, "neo4j:5.26.0-enterprise");
        let desired = base_sts(3, "neo4j:5.26.0-enterprise");

        let first = classify_statefulset(&live, &desired, false);
        let second = classify_statefulset(&live, &desired, false);
        assert_eq!(first.significance, second.significance);
        assert_eq!(first.changed_fields, second.changed_fields);
    }

    #[test]
    fn test_replicas_change_is_safe_live() {
        let live = base_sts(3, "neo4j:5.26.0-enterprise");
        let desired = base_sts(5, "neo4j:5.26.0-enterprise");

        let report = classify_statefulset(&live, &desired, false);
        assert_eq!(report.significance, Significance::SafeLive);
        assert!(report.scale_only);
        assert!(!report.image_changed);
    }

    #[test]
    fn test_image_change_requires_rolling_restart() {
        let live = base_sts(3, "neo4j:5.25.0-enterprise");
        let desired = base_sts(3, "neo4j:5.26.0-enterprise");

        let report = classify_statefulset(&live, &desired, false);
        assert_eq!(report.significance, Significance::RequiresRollingRestart);
        assert!(report.image_changed);
        assert!(!report.scale_only);
    }

    #[test]
    fn test_restart_blocked_during_formation() {
        let live = base_sts(3, "neo4j:5.25.0-enterprise");
        let desired = base_sts(3, "neo4j:5.26.0-enterprise");

        let report = classify_statefulset(&live, &desired, true);
        assert_eq!(report.significance, Significance::BlockedDuringFormation);
    }

    #[test]
    fn test_env_change_requires_restart() {
        let live = base_sts(3, "neo4j:5.26.0-enterprise");
        let mut desired = base_sts(3, "neo4j:5.26.0-enterprise");
        desired
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .containers[0]
            .env = Some(vec![EnvVar {
            name: "EXTRA".to_string(),
            value: Some("1".to_string()),
            ..Default::default()
        }]);

        let report = classify_statefulset(&live, &desired, false);
        assert_eq!(report.significance, Significance::RequiresRollingRestart);
        assert!(!report.image_changed);
    }

    #[test]
    fn test_immutable_diff_is_ignored_not_error() {
        let live = base_sts(3, "neo4j:5.26.0-enterprise");
        let mut desired = base_sts(3, "neo4j:5.26.0-enterprise");
        desired.spec.as_mut().unwrap().service_name = Some("renamed".to_string());

        let report = classify_statefulset(&live, &desired, false);
        assert_eq!(report.significance, Significance::NoOp);
        assert_eq!(report.ignored_immutable, vec!["spec.serviceName"]);
    }

    #[test]
    fn test_object_label_change_is_safe_live() {
        let live = base_sts(3, "neo4j:5.26.0-enterprise");
        let mut desired = base_sts(3, "neo4j:5.26.0-enterprise");
        desired.metadata.labels = Some(BTreeMap::from([(
            "team".to_string(),
            "data".to_string(),
        )]));

        let report = classify_statefulset(&live, &desired, false);
        assert_eq!(report.significance, Significance::SafeLive);
        assert!(!report.scale_only);
    }
}
