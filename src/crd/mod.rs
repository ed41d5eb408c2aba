//! Custom Resource Definitions (CRDs) for neo4j-operator.
//!
//! - `Neo4jCluster`: deploy and manage a server-based Neo4j cluster
//! - `Neo4jStandalone`: deploy a single Neo4j server

mod neo4j_cluster;
mod neo4j_standalone;

pub use neo4j_cluster::*;
pub use neo4j_standalone::*;
