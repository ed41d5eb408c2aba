//! Neo4j client wrapper using the neo4rs crate.
//!
//! The reconciler treats the database as a black-box RPC collaborator:
//! run a Cypher statement, get rows or an error. The `CypherExecutor` trait
//! is the seam the core depends on; `BoltClient` is the production
//! implementation, and tests substitute canned row sets.

use std::collections::BTreeMap;
use std::time::Duration;

use neo4rs::{Graph, query};
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors that can occur during Neo4j operations.
#[derive(Error, Debug)]
pub enum Neo4jError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Bolt error: {0}")]
    Bolt(#[from] neo4rs::Error),

    #[error("Query returned malformed row: {0}")]
    MalformedRow(String),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },
}

/// A single result row as a flat string map. Membership queries only read
/// scalar columns, so stringly-typed rows keep the seam narrow.
pub type Row = BTreeMap<String, String>;

/// The abstract query interface the core depends on.
pub trait CypherExecutor {
    /// Execute a statement and collect all rows.
    fn execute(
        &self,
        statement: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Row>, Neo4jError>> + Send;
}

/// Connection settings for a single server endpoint.
#[derive(Clone, Debug)]
pub struct BoltConfig {
    /// bolt:// URI of one server (never the load-balanced service when the
    /// caller needs that server's local view).
    pub uri: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl BoltConfig {
    /// Config for a specific server pod DNS name.
    pub fn for_endpoint(host: &str, port: i32, password: &str) -> Self {
        Self {
            uri: format!("bolt://{}:{}", host, port),
            user: "neo4j".to_string(),
            password: password.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Production Bolt client.
pub struct BoltClient {
    graph: Graph,
}

impl BoltClient {
    /// Connect to a single server.
    #[instrument(skip(config), fields(uri = %config.uri))]
    pub async fn connect(config: &BoltConfig) -> Result<Self, Neo4jError> {
        let graph = tokio::time::timeout(
            config.connect_timeout,
            Graph::new(&config.uri, &config.user, &config.password),
        )
        .await
        .map_err(|_| Neo4jError::Timeout {
            operation: format!("connect {}", config.uri),
            duration: config.connect_timeout,
        })?
        .map_err(|e| Neo4jError::Connection(e.to_string()))?;

        debug!(uri = %config.uri, "Connected to Neo4j server");
        Ok(Self { graph })
    }
}

impl CypherExecutor for BoltClient {
    async fn execute(&self, statement: &str) -> Result<Vec<Row>, Neo4jError> {
        let mut result = self.graph.execute(query(statement)).await?;

        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            let value: serde_json::Value = row
                .to()
                .map_err(|e| Neo4jError::MalformedRow(e.to_string()))?;
            let mut flat = BTreeMap::new();
            if let serde_json::Value::Object(map) = value {
                for (key, val) in map {
                    let text = match val {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Array(items) => items
                            .iter()
                            .map(|i| i.as_str().unwrap_or_default().to_string())
                            .collect::<Vec<_>>()
                            .join(","),
                        other => other.to_string(),
                    };
                    flat.insert(key, text);
                }
            }
            rows.push(flat);
        }

        Ok(rows)
    }
}
