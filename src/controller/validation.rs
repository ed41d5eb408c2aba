//! Validation gate for Neo4jCluster specs.
//!
//! Validation runs before any side effect. A failure short-circuits the
//! reconciliation: phase=Failed with the error as the condition message,
//! fixed requeue, and no Kubernetes resource is mutated.

use crate::config::memory::{parse_quantity, version_family};
use crate::controller::error::{Error, Result};
use crate::crd::{Neo4jCluster, Neo4jStandalone};

/// Minimum number of servers for a cluster resource.
pub const MIN_SERVERS: i32 = 1;

/// Maximum number of servers the operator will manage.
pub const MAX_SERVERS: i32 = 11;

/// Validation mode, chosen from the resource generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// First observed generation.
    Create,
    /// Spec edit of an existing resource.
    Update,
}

/// Validate a cluster spec.
pub fn validate_cluster(cluster: &Neo4jCluster, mode: ValidationMode) -> Result<()> {
    let spec = &cluster.spec;

    let servers = spec.topology.servers;
    if servers < MIN_SERVERS {
        return Err(Error::Validation(format!(
            "topology.servers {} is below minimum {}",
            servers, MIN_SERVERS
        )));
    }
    if servers > MAX_SERVERS {
        return Err(Error::Validation(format!(
            "topology.servers {} exceeds maximum {}",
            servers, MAX_SERVERS
        )));
    }
    // An even member count cannot improve fault tolerance and doubles the
    // chance of a tied election; reject everything but the 1-server and
    // 2-server (dev) cases. Only enforced at creation: an existing cluster
    // with an even count must keep reconciling.
    if mode == ValidationMode::Create && servers > 2 && servers % 2 == 0 {
        return Err(Error::Validation(format!(
            "topology.servers {} is even; quorum requires an odd server count",
            servers
        )));
    }

    if spec.auth.secret_ref.name.is_empty() {
        return Err(Error::Validation(
            "auth.secretRef.name is required".to_string(),
        ));
    }

    if let Some(tls) = &spec.tls {
        if tls.issuer_ref.name.is_empty() {
            return Err(Error::Validation(
                "tls.issuerRef.name is required when tls is set".to_string(),
            ));
        }
    }

    version_family(&spec.image.tag)
        .map_err(|e| Error::Validation(format!("image.tag: {}", e)))?;

    parse_quantity(&spec.storage.size)
        .map_err(|e| Error::Validation(format!("storage.size: {}", e)))?;
    parse_quantity(&spec.resources.limits.memory)
        .map_err(|e| Error::Validation(format!("resources.limits.memory: {}", e)))?;

    // Zones must be distinct or the skew math silently degrades.
    let zones = &spec.topology.availability_zones;
    let mut sorted = zones.clone();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != zones.len() {
        return Err(Error::Validation(
            "topology.availabilityZones contains duplicates".to_string(),
        ));
    }

    if spec.topology.enforce_distribution && zones.is_empty() {
        return Err(Error::Validation(
            "topology.enforceDistribution requires availabilityZones".to_string(),
        ));
    }

    Ok(())
}

/// Validate a standalone spec.
pub fn validate_standalone(standalone: &Neo4jStandalone) -> Result<()> {
    let spec = &standalone.spec;

    if spec.auth.secret_ref.name.is_empty() {
        return Err(Error::Validation(
            "auth.secretRef.name is required".to_string(),
        ));
    }

    version_family(&spec.image.tag)
        .map_err(|e| Error::Validation(format!("image.tag: {}", e)))?;
    parse_quantity(&spec.storage.size)
        .map_err(|e| Error::Validation(format!("storage.size: {}", e)))?;
    parse_quantity(&spec.resources.limits.memory)
        .map_err(|e| Error::Validation(format!("resources.limits.memory: {}", e)))?;

    Ok(())
}
