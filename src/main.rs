//! lb-registrar-operator - keeps OCI load balancer backend sets in sync with
//! the nodes of a Kubernetes cluster.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Runs leader election (required for HA deployments)
//! - Starts the controller, its change triggers and the health server

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lb_registrar_operator::health::run_health_server;
use lb_registrar_operator::{HealthState, OperatorConfig, run_controller};

/// Lease configuration
const LEASE_NAME: &str = "lb-registrar-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lb_registrar_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    info!("Starting lb-registrar-operator");

    let config = OperatorConfig::from_env();
    info!(config = ?config, "Loaded operator configuration");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });

    info!(
        holder_id = %pod_name,
        namespace = %config.namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());

    // Probes must answer while waiting for leadership.
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_params = || LeaseLockParams {
        holder_id: pod_name.clone(),
        lease_name: LEASE_NAME.to_string(),
        lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
    };
    let lease_lock = LeaseLock::new(client.clone(), &config.namespace, lease_params());

    info!("Waiting to acquire leadership...");
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    let lease_renewal_handle = {
        let lease_lock = LeaseLock::new(client.clone(), &config.namespace, lease_params());

        #[allow(clippy::exit)]
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

                match lease_lock.try_acquire_or_renew().await {
                    Ok(result) if !result.acquired_lease => {
                        error!("Lost leadership! Shutting down...");
                        // Kubernetes restarts the pod, which re-enters the election.
                        std::process::exit(1);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    let shutdown = CancellationToken::new();
    let mut controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_controller(controller_client, config, Some(health_state), shutdown).await;
        })
    };

    let shutdown_requested = tokio::select! {
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
            false
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
            false
        }
        // Only reached on panic; lost leadership exits the process.
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
            false
        }
        _ = shutdown_signal() => true,
    };

    if shutdown_requested {
        info!("Received shutdown signal, initiating graceful shutdown...");

        health_state.set_ready(false).await;
        info!("Marked operator as not ready");

        shutdown.cancel();
        info!(
            "Waiting up to {}s for in-flight reconciliations to complete...",
            SHUTDOWN_GRACE_PERIOD_SECS
        );
        if tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
            controller_handle,
        )
        .await
        .is_err()
        {
            warn!("Grace period elapsed with reconciliations still running");
        }
    } else {
        shutdown.cancel();
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal: the operator cannot shut down
/// gracefully without them.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
