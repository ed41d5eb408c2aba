//! Configuration derivation for Neo4j servers.
//!
//! - `memory`: heap/page-cache sizing and version-family detection
//! - `render`: neo4j.conf text generation

pub mod memory;
pub mod render;
