//! Neo4j client collaborator.
//!
//! - `cypher`: the black-box "run statement, get rows or error" seam
//! - `membership`: `SHOW SERVERS` views used by formation, upgrade health
//!   gating, and split-brain detection

pub mod cypher;
pub mod membership;

pub use cypher::{BoltClient, BoltConfig, CypherExecutor, Neo4jError, Row};
pub use membership::{MembershipView, ServerHealth, ServerInfo, fetch_membership_view};
