//! Shared context for the controller.
//!
//! Holds the Kubernetes client, event recorder, health state, and the
//! explicitly-scoped per-cluster state (config debounce bookkeeping,
//! reconcile rate limiter, split-brain tick guards). Constructed once at
//! startup and passed into the driver; nothing here is a package-level
//! singleton.

use std::collections::HashMap;
use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tokio::sync::Mutex;

use crate::controller::config_convergence::ConfigDebouncer;
use crate::controller::rate_limit::ReconcileRateLimiter;
use crate::health::HealthState;
use crate::resources::common::OPERATOR_NAME;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Per-cluster ConfigMap write debouncing
    pub config_debouncer: Arc<ConfigDebouncer>,
    /// Per-cluster reconcile rate limiting
    pub rate_limiter: Arc<ReconcileRateLimiter>,
    /// Per-cluster guards serializing the split-brain tick against the main
    /// reconciliation for the same cluster
    pub cluster_guards: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: OPERATOR_NAME.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            config_debouncer: Arc::new(ConfigDebouncer::default()),
            rate_limiter: Arc::new(ReconcileRateLimiter::default()),
            cluster_guards: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get (or create) the guard mutex for a cluster, keyed by
    /// "namespace/name".
    pub async fn guard_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut guards = self.cluster_guards.lock().await;
        guards
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop per-cluster state when a cluster is deleted.
    pub async fn forget_cluster(&self, key: &str) {
        self.cluster_guards.lock().await.remove(key);
        self.config_debouncer.forget(key).await;
        self.rate_limiter.forget(key).await;
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish warning event");
        }
    }
}
