//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for reconciliation metrics (namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for phase-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub phase: String,
}

impl EncodeLabelSet for PhaseLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for conflict-retry metrics (resource kind)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct KindLabels {
    pub kind: String,
}

impl EncodeLabelSet for KindLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// Optimistic-concurrency conflict retries in the applier
    pub conflict_retries_total: Family<KindLabels, Counter>,
    /// Total clusters by phase
    pub clusters_total: Family<PhaseLabels, Gauge>,
    /// Desired servers per cluster
    pub cluster_servers_desired: Family<ReconcileLabels, Gauge>,
    /// Ready servers per cluster
    pub cluster_servers_ready: Family<ReconcileLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "neo4j_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "neo4j_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "neo4j_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let conflict_retries_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "neo4j_operator_conflict_retries",
            "Optimistic-concurrency conflicts retried by the applier",
            conflict_retries_total.clone(),
        );

        let clusters_total = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "neo4j_operator_clusters_total",
            "Total number of Neo4jCluster resources by phase",
            clusters_total.clone(),
        );

        let cluster_servers_desired = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "neo4j_operator_cluster_servers_desired",
            "Desired number of servers for each cluster",
            cluster_servers_desired.clone(),
        );

        let cluster_servers_ready = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "neo4j_operator_cluster_servers_ready",
            "Number of ready servers for each cluster",
            cluster_servers_ready.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            conflict_retries_total,
            clusters_total,
            cluster_servers_desired,
            cluster_servers_ready,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Record one conflict retry in the applier
    pub fn record_conflict_retry(&self, kind: &str) {
        let labels = KindLabels {
            kind: kind.to_string(),
        };
        self.conflict_retries_total.get_or_create(&labels).inc();
    }

    /// Update cluster count by phase
    pub fn set_clusters_by_phase(&self, phase: &str, count: i64) {
        let labels = PhaseLabels {
            phase: phase.to_string(),
        };
        self.clusters_total.get_or_create(&labels).set(count);
    }

    /// Update cluster server metrics
    pub fn set_cluster_servers(&self, namespace: &str, name: &str, desired: i64, ready: i64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.cluster_servers_desired
            .get_or_create(&labels)
            .set(desired);
        self.cluster_servers_ready.get_or_create(&labels).set(ready);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on 0.0.0.0:8080.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8080));
    info!(port = 8080, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
