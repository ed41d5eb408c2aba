//! Neo4jCluster Custom Resource Definition.
//!
//! Defines the Neo4jCluster CRD for deploying and managing Neo4j Enterprise
//! clusters on Kubernetes. Clusters use the server-based architecture: all
//! database instances are homogeneous at the infrastructure layer and
//! self-organize into logical roles at the data layer.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Neo4jCluster is a custom resource for deploying Neo4j Enterprise clusters.
///
/// Example:
/// ```yaml
/// apiVersion: neo4joperator.io/v1alpha1
/// kind: Neo4jCluster
/// metadata:
///   name: graph
/// spec:
///   topology:
///     servers: 3
///     availabilityZones: ["eu-west-1a", "eu-west-1b", "eu-west-1c"]
///   image:
///     tag: 5.26.0-enterprise
///   storage:
///     size: 10Gi
///   auth:
///     secretRef:
///       name: neo4j-auth
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "neo4joperator.io",
    version = "v1alpha1",
    kind = "Neo4jCluster",
    plural = "neo4jclusters",
    shortname = "n4c",
    status = "Neo4jClusterStatus",
    namespaced,
    // Print columns for kubectl get
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Servers", "type":"integer", "jsonPath":".spec.topology.servers"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.servers"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.image.tag"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct Neo4jClusterSpec {
    /// Cluster topology: server count and placement constraints.
    #[serde(default)]
    pub topology: TopologySpec,

    /// Neo4j container image configuration.
    #[serde(default)]
    pub image: ImageSpec,

    /// Persistent storage configuration.
    #[serde(default)]
    pub storage: StorageSpec,

    /// Authentication configuration (initial password secret).
    pub auth: AuthSpec,

    /// TLS configuration using cert-manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,

    /// Rolling upgrade tuning.
    #[serde(default)]
    pub upgrade_strategy: UpgradeStrategySpec,

    /// Scheduled backup sidecar workload.
    #[serde(default)]
    pub backups: BackupSpec,

    /// Resource requests and limits for server pods.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Extra neo4j.conf settings merged over the generated configuration.
    /// Generated keys win on conflict.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Additional labels applied to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations applied to all managed resources.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for Neo4jClusterSpec {
    fn default() -> Self {
        Self {
            topology: TopologySpec::default(),
            image: ImageSpec::default(),
            storage: StorageSpec::default(),
            auth: AuthSpec::default(),
            tls: None,
            upgrade_strategy: UpgradeStrategySpec::default(),
            backups: BackupSpec::default(),
            resources: ResourceRequirementsSpec::default(),
            config: BTreeMap::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Cluster topology and placement constraints.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpec {
    /// Number of Neo4j servers (minimum 1, default 3).
    /// Write quorum requires a majority, so fault tolerance is floor((N-1)/2).
    #[serde(default = "default_servers")]
    pub servers: i32,

    /// Availability zones to spread servers across. Empty means no zone
    /// constraint is emitted.
    #[serde(default)]
    pub availability_zones: Vec<String>,

    /// When true, zone distribution is mandatory: no zone may hold more than
    /// ceil(N/Z) servers and scheduling blocks rather than violate the skew.
    /// When false, distribution is best-effort.
    #[serde(default)]
    pub enforce_distribution: bool,

    /// Anti-affinity mode between server pods on the topology key.
    #[serde(default)]
    pub anti_affinity: AntiAffinityMode,

    /// Topology key for anti-affinity (default: kubernetes.io/hostname).
    #[serde(default = "default_topology_key")]
    pub topology_key: String,
}

impl Default for TopologySpec {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            availability_zones: Vec::new(),
            enforce_distribution: false,
            anti_affinity: AntiAffinityMode::default(),
            topology_key: default_topology_key(),
        }
    }
}

fn default_servers() -> i32 {
    3
}

fn default_topology_key() -> String {
    "kubernetes.io/hostname".to_string()
}

/// Anti-affinity strength for server pods.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum AntiAffinityMode {
    /// Soft constraint: scheduler prefers spreading but may co-locate.
    #[default]
    Preferred,
    /// Hard constraint: pods must land on distinct topology domains.
    Required,
}

/// Container image specification.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Container image repository (default: neo4j).
    #[serde(default = "default_image_repository")]
    pub repository: String,

    /// Image tag (default: 5.26.0-enterprise).
    #[serde(default = "default_image_tag")]
    pub tag: String,

    /// Image pull policy (default: IfNotPresent).
    #[serde(default = "default_image_pull_policy")]
    pub pull_policy: String,

    /// Image pull secrets.
    #[serde(default)]
    pub pull_secrets: Vec<String>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            repository: default_image_repository(),
            tag: default_image_tag(),
            pull_policy: default_image_pull_policy(),
            pull_secrets: Vec::new(),
        }
    }
}

impl ImageSpec {
    /// Full image reference, e.g. `neo4j:5.26.0-enterprise`.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

fn default_image_repository() -> String {
    "neo4j".to_string()
}

fn default_image_tag() -> String {
    "5.26.0-enterprise".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

/// Persistent storage configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Size of the data PersistentVolumeClaim (default: 10Gi).
    #[serde(default = "default_storage_size")]
    pub size: String,

    /// Storage class name. If not set, uses the cluster default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            size: default_storage_size(),
            class_name: None,
        }
    }
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Reference to a Secret containing the neo4j user password.
    pub secret_ref: SecretKeyRef,
}

/// Reference to a key within a Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the Secret.
    pub name: String,

    /// Key within the Secret containing the password (default: password).
    #[serde(default = "default_password_key")]
    pub key: String,
}

fn default_password_key() -> String {
    "password".to_string()
}

/// TLS configuration for intra-cluster and Bolt traffic.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// cert-manager Issuer or ClusterIssuer reference.
    pub issuer_ref: IssuerRef,

    /// Duration of the certificate (default: 2160h = 90 days).
    #[serde(default = "default_cert_duration")]
    pub duration: String,

    /// Time before expiry to renew the certificate (default: 360h = 15 days).
    #[serde(default = "default_renew_before")]
    pub renew_before: String,
}

fn default_cert_duration() -> String {
    "2160h".to_string()
}

fn default_renew_before() -> String {
    "360h".to_string()
}

/// Reference to a cert-manager Issuer or ClusterIssuer.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    /// Name of the Issuer or ClusterIssuer.
    pub name: String,

    /// Kind of the issuer (Issuer or ClusterIssuer, default: ClusterIssuer).
    #[serde(default = "default_issuer_kind")]
    pub kind: String,

    /// Group of the issuer (default: cert-manager.io).
    #[serde(default = "default_issuer_group")]
    pub group: String,
}

fn default_issuer_kind() -> String {
    "ClusterIssuer".to_string()
}

fn default_issuer_group() -> String {
    "cert-manager.io".to_string()
}

/// Rolling upgrade tuning.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStrategySpec {
    /// Seconds to wait for an upgraded batch to become healthy before the
    /// upgrade pauses (default: 600).
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_seconds: u64,

    /// Health-check attempts per batch before pausing (default: 3).
    #[serde(default = "default_health_retries")]
    pub health_retries: u32,
}

impl Default for UpgradeStrategySpec {
    fn default() -> Self {
        Self {
            batch_timeout_seconds: default_batch_timeout(),
            health_retries: default_health_retries(),
        }
    }
}

fn default_batch_timeout() -> u64 {
    600
}

fn default_health_retries() -> u32 {
    3
}

/// Scheduled backup workload configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Enable the backup StatefulSet (default: false).
    #[serde(default)]
    pub enabled: bool,

    /// Cron schedule for backups (default: daily at 02:00).
    #[serde(default = "default_backup_schedule")]
    pub schedule: String,

    /// Size of the backup volume (default: 10Gi).
    #[serde(default = "default_storage_size")]
    pub volume_size: String,
}

impl Default for BackupSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: default_backup_schedule(),
            volume_size: default_storage_size(),
        }
    }
}

fn default_backup_schedule() -> String {
    "0 2 * * *".to_string()
}

/// Resource requests and limits for server pods.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// CPU and memory requests.
    #[serde(default)]
    pub requests: ResourceSpec,

    /// CPU and memory limits.
    #[serde(default)]
    pub limits: ResourceLimitsSpec,
}

/// Resource requests specification.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU request (default: 500m).
    #[serde(default = "default_cpu_request")]
    pub cpu: String,

    /// Memory request (default: 2Gi).
    #[serde(default = "default_memory_request")]
    pub memory: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu: default_cpu_request(),
            memory: default_memory_request(),
        }
    }
}

fn default_cpu_request() -> String {
    "500m".to_string()
}

fn default_memory_request() -> String {
    "2Gi".to_string()
}

/// Resource limits specification.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimitsSpec {
    /// CPU limit (default: 2).
    #[serde(default = "default_cpu_limit")]
    pub cpu: String,

    /// Memory limit (default: 4Gi). Heap and page cache are derived from
    /// this value.
    #[serde(default = "default_memory_limit")]
    pub memory: String,
}

impl Default for ResourceLimitsSpec {
    fn default() -> Self {
        Self {
            cpu: default_cpu_limit(),
            memory: default_memory_limit(),
        }
    }
}

fn default_cpu_limit() -> String {
    "2".to_string()
}

fn default_memory_limit() -> String {
    "4Gi".to_string()
}

/// Status of a Neo4jCluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Neo4jClusterStatus {
    /// Current phase of the cluster lifecycle.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Ready servers in "ready/total" format (e.g., "3/3").
    #[serde(default)]
    pub servers: String,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state, ordered and keyed by type.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Live rolling upgrade state. Present only while an upgrade is active;
    /// cleared on the reconciliation after completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeState>,

    /// Projected placement plan for the current topology.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology: Option<TopologyStatus>,

    /// Hash of the last applied normalized configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    /// Bolt endpoint for clients (e.g., "neo4j://graph.ns.svc:7687").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_endpoint: Option<String>,

    /// Name of the Secret containing the TLS CA certificate, when TLS is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<String>,
}

/// ClusterPhase represents the current lifecycle phase of a Neo4jCluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterPhase {
    /// No resources created yet, waiting for first reconciliation.
    #[default]
    Empty,
    /// Kubernetes resources (StatefulSet, Services) are being created.
    Initializing,
    /// Servers are running and discovering each other; the cluster has not
    /// yet reported a complete membership view.
    Forming,
    /// Cluster is fully operational.
    Ready,
    /// A rolling upgrade is in progress.
    Upgrading,
    /// Server count is being changed.
    Scaling,
    /// Cluster has failed and requires intervention.
    Failed,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Empty => write!(f, "Empty"),
            ClusterPhase::Initializing => write!(f, "Initializing"),
            ClusterPhase::Forming => write!(f, "Forming"),
            ClusterPhase::Ready => write!(f, "Ready"),
            ClusterPhase::Upgrading => write!(f, "Upgrading"),
            ClusterPhase::Scaling => write!(f, "Scaling"),
            ClusterPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition describes the state of a cluster at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create a "SplitBrain" condition.
    pub fn split_brain(detected: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("SplitBrain", detected, reason, message, generation)
    }
}

/// Machine-readable reasons used in status conditions.
///
/// Kept as a small fixed vocabulary so tooling can match on them.
pub mod reasons {
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const CLUSTER_NOT_FOUND: &str = "ClusterNotFound";
    pub const CLUSTER_NOT_READY: &str = "ClusterNotReady";
    pub const CONNECTION_FAILED: &str = "ConnectionFailed";
    pub const CREATION_FAILED: &str = "CreationFailed";
    pub const UPGRADE_PAUSED: &str = "UpgradePaused";
    pub const SPLIT_BRAIN_DETECTED: &str = "SplitBrainDetected";
    pub const ALL_SERVERS_READY: &str = "AllServersReady";
    pub const RECONCILING: &str = "Reconciling";
}

/// Live state of a rolling upgrade, nested in the cluster status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeState {
    /// Current phase of the upgrade.
    #[serde(default)]
    pub phase: UpgradePhase,

    /// Version the cluster is upgrading away from.
    pub previous_version: String,

    /// Version the cluster is upgrading to.
    pub target_version: String,

    /// Batch progress counters.
    #[serde(default)]
    pub progress: UpgradeProgress,

    /// Servers failing the health gate while Paused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unhealthy_servers: Vec<String>,

    /// Timestamp when the current batch started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_started_at: Option<String>,

    /// Health-check attempts spent on the current batch.
    #[serde(default)]
    pub batch_attempts: u32,
}

/// Phase of a rolling upgrade.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum UpgradePhase {
    /// Upgrade detected, not yet started.
    #[default]
    Pending,
    /// Batches are being upgraded.
    InProgress,
    /// A batch failed its health gate; waiting for recovery or operator
    /// action. Recoverable: resumes when the failure clears.
    Paused,
    /// All servers upgraded.
    Completed,
    /// Upgrade failed beyond the retry budget.
    Failed,
}

impl UpgradePhase {
    /// Check if this phase is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradePhase::Completed | UpgradePhase::Failed)
    }
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpgradePhase::Pending => write!(f, "Pending"),
            UpgradePhase::InProgress => write!(f, "InProgress"),
            UpgradePhase::Paused => write!(f, "Paused"),
            UpgradePhase::Completed => write!(f, "Completed"),
            UpgradePhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Batch progress counters for a rolling upgrade.
///
/// Invariant: `upgraded + in_progress + pending == total` at every
/// observation point. Use the constructors to keep it that way.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeProgress {
    /// Total servers to upgrade.
    pub total: i32,
    /// Servers fully upgraded and healthy.
    pub upgraded: i32,
    /// Servers in the batch currently restarting.
    pub in_progress: i32,
    /// Servers not yet touched.
    pub pending: i32,
}

impl UpgradeProgress {
    /// Fresh progress: nothing upgraded yet.
    pub fn new(total: i32) -> Self {
        Self {
            total,
            upgraded: 0,
            in_progress: 0,
            pending: total,
        }
    }

    /// Progress with a batch of `batch` servers in flight after `upgraded`
    /// servers already done.
    pub fn with_batch(total: i32, upgraded: i32, batch: i32) -> Self {
        let in_progress = batch.min(total - upgraded).max(0);
        Self {
            total,
            upgraded,
            in_progress,
            pending: total - upgraded - in_progress,
        }
    }

    /// All servers done.
    pub fn completed(total: i32) -> Self {
        Self {
            total,
            upgraded: total,
            in_progress: 0,
            pending: 0,
        }
    }

    /// Check the accounting invariant.
    pub fn is_consistent(&self) -> bool {
        self.upgraded + self.in_progress + self.pending == self.total
            && self.upgraded >= 0
            && self.in_progress >= 0
            && self.pending >= 0
    }
}

/// Projected topology placement, surfaced in status for kubectl visibility.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStatus {
    /// Per-server zone assignment ("ordinal=zone" entries, stable order).
    #[serde(default)]
    pub assignments: Vec<String>,

    /// Whether zone distribution is enforced.
    #[serde(default)]
    pub enforced: bool,
}

/// Maximum number of servers that may be offline simultaneously without
/// losing write quorum: floor((N-1)/2), never below zero.
pub fn quorum_budget(servers: i32) -> i32 {
    ((servers - 1) / 2).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(ClusterPhase::Empty.to_string(), "Empty");
        assert_eq!(ClusterPhase::Initializing.to_string(), "Initializing");
        assert_eq!(ClusterPhase::Forming.to_string(), "Forming");
        assert_eq!(ClusterPhase::Ready.to_string(), "Ready");
        assert_eq!(ClusterPhase::Upgrading.to_string(), "Upgrading");
        assert_eq!(ClusterPhase::Scaling.to_string(), "Scaling");
        assert_eq!(ClusterPhase::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(ClusterPhase::default(), ClusterPhase::Empty);
    }

    #[test]
    fn test_default_spec() {
        let spec = Neo4jClusterSpec::default();
        assert_eq!(spec.topology.servers, 3);
        assert!(spec.topology.availability_zones.is_empty());
        assert!(!spec.topology.enforce_distribution);
        assert_eq!(spec.image.repository, "neo4j");
        assert_eq!(spec.image.tag, "5.26.0-enterprise");
        assert_eq!(spec.storage.size, "10Gi");
        assert!(!spec.backups.enabled);
    }

    #[test]
    fn test_image_reference() {
        let image = ImageSpec::default();
        assert_eq!(image.reference(), "neo4j:5.26.0-enterprise");
    }

    #[test]
    fn test_spec_serialization() {
        let spec = Neo4jClusterSpec {
            topology: TopologySpec {
                servers: 5,
                availability_zones: vec!["a".to_string(), "b".to_string()],
                enforce_distribution: true,
                ..Default::default()
            },
            auth: AuthSpec {
                secret_ref: SecretKeyRef {
                    name: "neo4j-auth".to_string(),
                    key: "password".to_string(),
                },
            },
            ..Default::default()
        };

        let json = serde_json::to_string(&spec).expect("serialization should succeed");
        let parsed: Neo4jClusterSpec =
            serde_json::from_str(&json).expect("deserialization should succeed");

        assert_eq!(parsed.topology.servers, 5);
        assert!(parsed.topology.enforce_distribution);
        assert_eq!(parsed.auth.secret_ref.name, "neo4j-auth");
    }

    #[test]
    fn test_quorum_budget() {
        assert_eq!(quorum_budget(1), 0);
        assert_eq!(quorum_budget(2), 0);
        assert_eq!(quorum_budget(3), 1);
        assert_eq!(quorum_budget(4), 1);
        assert_eq!(quorum_budget(5), 2);
        assert_eq!(quorum_budget(7), 3);
    }

    #[test]
    fn test_upgrade_progress_invariant() {
        let fresh = UpgradeProgress::new(5);
        assert!(fresh.is_consistent());
        assert_eq!(fresh.pending, 5);

        let mid = UpgradeProgress::with_batch(5, 2, 2);
        assert!(mid.is_consistent());
        assert_eq!(mid.upgraded, 2);
        assert_eq!(mid.in_progress, 2);
        assert_eq!(mid.pending, 1);

        let done = UpgradeProgress::completed(5);
        assert!(done.is_consistent());
        assert_eq!(done.pending, 0);
    }

    #[test]
    fn test_upgrade_progress_batch_clamped() {
        // Batch larger than remaining servers must not go negative.
        let p = UpgradeProgress::with_batch(5, 4, 2);
        assert!(p.is_consistent());
        assert_eq!(p.in_progress, 1);
        assert_eq!(p.pending, 0);
    }

    #[test]
    fn test_upgrade_phase_terminal() {
        assert!(UpgradePhase::Completed.is_terminal());
        assert!(UpgradePhase::Failed.is_terminal());
        assert!(!UpgradePhase::Pending.is_terminal());
        assert!(!UpgradePhase::InProgress.is_terminal());
        assert!(!UpgradePhase::Paused.is_terminal());
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "AllServersReady", "All servers ready", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "AllServersReady");
        assert_eq!(condition.observed_generation, Some(1));
    }

    #[test]
    fn test_condition_not_ready() {
        let condition = Condition::ready(false, "ClusterNotReady", "Servers starting", None);
        assert_eq!(condition.status, "False");
    }
}
