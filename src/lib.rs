//! neo4j-operator library crate
//!
//! Exports the controllers, CRD definitions, resource builders, config
//! derivation, and the Neo4j client collaborator.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::{context::Context, reconciler, split_brain, standalone};
use crd::{Neo4jCluster, Neo4jStandalone};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` gives more reliable resource discovery in test
/// environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// Reflector-backed, automatic retry with backoff, Added/Modified objects
/// only, status-only updates filtered via the generation predicate.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run both controllers and the split-brain monitor (cluster-wide).
pub async fn run_controller(client: Client, health_state: Option<Arc<HealthState>>) {
    run_controller_scoped(client, health_state, None).await
}

/// Run the controllers with optional namespace scoping.
///
/// `Some(ns)` watches one namespace (used by integration tests for
/// parallelism); `None` watches cluster-wide.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!("Starting controllers (scope: {})", scope_msg);

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), health_state));

    // Independent periodic path: split-brain detection.
    let monitor_ctx = ctx.clone();
    let monitor_ns = namespace.map(|s| s.to_string());
    tokio::spawn(async move {
        split_brain::run_split_brain_monitor(monitor_ctx, monitor_ns).await;
    });

    let clusters: Api<Neo4jCluster> = scoped_api(client.clone(), namespace);
    let standalones: Api<Neo4jStandalone> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();

    let (cluster_reader, cluster_stream) =
        create_filtered_stream(clusters, watcher_config.clone());

    // Owned watches: full watcher for StatefulSets (we read status), metadata
    // only for Services/ConfigMaps.
    let cluster_controller = Controller::for_stream(cluster_stream, cluster_reader)
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services.clone(), watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config.clone()).touched_objects())
        .run(reconciler::reconcile, reconciler::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled cluster: {}", obj.name);
                }
                Err(e) => {
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Cluster no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Cluster reconciliation error: {:?}", e);
                    }
                }
            }
        });

    let (standalone_reader, standalone_stream) =
        create_filtered_stream(standalones, watcher_config.clone());
    let standalone_controller = Controller::for_stream(standalone_stream, standalone_reader)
        .owns_stream(metadata_watcher(services, watcher_config).touched_objects())
        .run(standalone::reconcile, standalone::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled standalone: {}", obj.name);
                }
                Err(e) => {
                    error!("Standalone reconciliation error: {:?}", e);
                }
            }
        });

    tokio::join!(cluster_controller, standalone_controller);

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}
