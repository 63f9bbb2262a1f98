//! lb-registrar-operator library crate
//!
//! Keeps OCI load balancer backend sets in sync with the nodes of the
//! cluster. Exports the controller, the LBRegistrar CRD, the cloud
//! providers and the cluster inventory reads.

pub mod cloud;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod inventory;
pub mod targets;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Node};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cloud::work_request::CompletionTracker;
use controller::triggers::{run_endpoints_trigger, run_node_trigger};
use controller::{context::Context, reconciler::reconcile};
use crd::LBRegistrar;

/// Create the default watcher configuration.
///
/// `any_semantic()` gives more reliable discovery in test environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed stream for a resource type.
///
/// Status-only changes are not filtered out: a trigger resetting the phase
/// to `PENDING` must start a new pass.
fn create_stream<K>(
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
        .applied_objects();
    (reader, stream)
}

/// Run the LBRegistrar controller and its change triggers.
///
/// Returns once `shutdown` is cancelled and in-flight reconciliations have
/// finished, or if the controller stream ends.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
    shutdown: CancellationToken,
) {
    info!("Starting controller for LBRegistrar resources");

    let tracker = CompletionTracker::new(
        config.work_request_poll_interval,
        config.work_request_max_attempts,
        shutdown.child_token(),
    );
    let ctx = Arc::new(Context::new(
        client.clone(),
        config,
        health_state.clone(),
        tracker,
    ));

    let registrars: Api<LBRegistrar> = Api::all(client.clone());
    let (reader, registrar_stream) = create_stream(registrars, default_watcher_config());

    // Triggers read registrar phases from the controller's cache.
    let node_trigger = tokio::spawn({
        let ctx = ctx.clone();
        let reader = reader.clone();
        let nodes: Api<Node> = Api::all(client.clone());
        let shutdown = shutdown.clone();
        async move {
            if reader.wait_until_ready().await.is_err() {
                error!("LBRegistrar cache was dropped before it became ready");
                return;
            }
            run_node_trigger(ctx, reader, nodes, shutdown).await;
        }
    });
    let endpoints_trigger = tokio::spawn({
        let ctx = ctx.clone();
        let reader = reader.clone();
        let endpoints: Api<Endpoints> = Api::all(client.clone());
        let shutdown = shutdown.clone();
        async move {
            if reader.wait_until_ready().await.is_err() {
                error!("LBRegistrar cache was dropped before it became ready");
                return;
            }
            run_endpoints_trigger(ctx, reader, endpoints, shutdown).await;
        }
    });

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    Controller::for_stream(registrar_stream, reader)
        .graceful_shutdown_on(shutdown.clone().cancelled_owned())
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // ObjectNotFound errors are expected after deletion.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    if shutdown.is_cancelled() {
        info!("Controller stopped");
    } else {
        error!("Controller stream ended unexpectedly");
        shutdown.cancel();
    }

    let _ = tokio::join!(node_trigger, endpoints_trigger);
}
