//! Neo4jStandalone Custom Resource Definition.
//!
//! Single-server deployment sharing the cluster's resource builders and
//! conflict-safe applier through the reconcilable-entity interface. No
//! formation phase, no upgrade batching (a single server is its own batch).

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::neo4j_cluster::{
    AuthSpec, Condition, ImageSpec, ResourceRequirementsSpec, StorageSpec, TlsSpec,
};

/// Neo4jStandalone deploys a single Neo4j server.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "neo4joperator.io",
    version = "v1alpha1",
    kind = "Neo4jStandalone",
    plural = "neo4jstandalones",
    shortname = "n4s",
    status = "Neo4jStandaloneStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.image.tag"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct Neo4jStandaloneSpec {
    /// Neo4j container image configuration.
    #[serde(default)]
    pub image: ImageSpec,

    /// Persistent storage configuration.
    #[serde(default)]
    pub storage: StorageSpec,

    /// Authentication configuration.
    pub auth: AuthSpec,

    /// TLS configuration using cert-manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,

    /// Resource requests and limits.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Extra neo4j.conf settings merged over the generated configuration.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Additional labels applied to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations applied to all managed resources.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for Neo4jStandaloneSpec {
    fn default() -> Self {
        Self {
            image: ImageSpec::default(),
            storage: StorageSpec::default(),
            auth: AuthSpec::default(),
            tls: None,
            resources: ResourceRequirementsSpec::default(),
            config: BTreeMap::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

/// Status of a Neo4jStandalone.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Neo4jStandaloneStatus {
    /// Current phase, reusing the standalone subset of the cluster phases.
    #[serde(default)]
    pub phase: StandalonePhase,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Bolt endpoint for clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_endpoint: Option<String>,
}

/// Lifecycle phase of a standalone server.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum StandalonePhase {
    /// No resources created yet.
    #[default]
    Empty,
    /// Resources created, server starting.
    Initializing,
    /// Server is up and serving.
    Ready,
    /// Failed and requires intervention.
    Failed,
}

impl std::fmt::Display for StandalonePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StandalonePhase::Empty => write!(f, "Empty"),
            StandalonePhase::Initializing => write!(f, "Initializing"),
            StandalonePhase::Ready => write!(f, "Ready"),
            StandalonePhase::Failed => write!(f, "Failed"),
        }
    }
}
