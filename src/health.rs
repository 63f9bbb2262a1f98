//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

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

/// Labels for per-registrar metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RegistrarLabels {
    pub name: String,
}

impl EncodeLabelSet for RegistrarLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for backend push outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SyncLabels {
    pub provider: String,
    pub result: String,
}

impl EncodeLabelSet for SyncLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("provider", self.provider.as_str()).encode(encoder.encode_label())?;
        ("result", self.result.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for registered backend counts
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BackendSetLabels {
    pub name: String,
    pub backend_set: String,
}

impl EncodeLabelSet for BackendSetLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("backend_set", self.backend_set.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for phase resets
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TriggerLabels {
    pub trigger: String,
}

impl EncodeLabelSet for TriggerLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("trigger", self.trigger.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    pub reconciliations_total: Family<RegistrarLabels, Counter>,
    pub reconciliation_errors_total: Family<RegistrarLabels, Counter>,
    pub reconcile_duration_seconds: Family<RegistrarLabels, Histogram>,
    /// Backend set pushes by provider and outcome
    pub backend_syncs_total: Family<SyncLabels, Counter>,
    /// Backends in the last successful push per backend set
    pub backends_registered: Family<BackendSetLabels, Gauge>,
    /// Registrars sent back to Pending by a trigger
    pub phase_resets_total: Family<TriggerLabels, Counter>,
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

        let reconciliations_total = Family::<RegistrarLabels, Counter>::default();
        registry.register(
            "lbregistrar_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<RegistrarLabels, Counter>::default();
        registry.register(
            "lbregistrar_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<RegistrarLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.0, 15))
            });
        registry.register(
            "lbregistrar_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let backend_syncs_total = Family::<SyncLabels, Counter>::default();
        registry.register(
            "lbregistrar_backend_syncs",
            "Backend set updates by provider and result",
            backend_syncs_total.clone(),
        );

        let backends_registered = Family::<BackendSetLabels, Gauge>::default();
        registry.register(
            "lbregistrar_backends_registered",
            "Backends pushed in the last successful update of each backend set",
            backends_registered.clone(),
        );

        let phase_resets_total = Family::<TriggerLabels, Counter>::default();
        registry.register(
            "lbregistrar_phase_resets",
            "Registrars reset to PENDING by cluster changes",
            phase_resets_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            backend_syncs_total,
            backends_registered,
            phase_resets_total,
            registry,
        }
    }

    /// Record a completed reconciliation
    pub fn record_reconcile(&self, name: &str, duration_secs: f64) {
        let labels = RegistrarLabels {
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, name: &str) {
        let labels = RegistrarLabels {
            name: name.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    pub fn record_backend_sync(&self, provider: &str, success: bool) {
        let labels = SyncLabels {
            provider: provider.to_string(),
            result: if success { "success" } else { "failure" }.to_string(),
        };
        self.backend_syncs_total.get_or_create(&labels).inc();
    }

    pub fn set_backends_registered(&self, name: &str, backend_set: &str, count: i64) {
        let labels = BackendSetLabels {
            name: name.to_string(),
            backend_set: backend_set.to_string(),
        };
        self.backends_registered.get_or_create(&labels).set(count);
    }

    pub fn record_phase_resets(&self, trigger: &str, count: u64) {
        let labels = TriggerLabels {
            trigger: trigger.to_string(),
        };
        self.phase_resets_total.get_or_create(&labels).inc_by(count);
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

    pub fn mark_reconciled(&self) {
        self.last_reconcile
            .store(jiff::Timestamp::now().as_second().max(0) as u64, Ordering::Relaxed);
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until leadership is acquired and the
/// controller is running.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

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

/// Run the health server on `0.0.0.0:{port}`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
