//! Phase handlers for LBRegistrar reconciliation.
//!
//! Each handler performs the side effects of one phase and reports the
//! lifecycle event they produced. The reconciler maps that event through the
//! state machine and persists the resulting phase.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::context::Context;
use super::error::Error;
use super::registration::{SyncReport, register};
use super::state_machine::RegistrarEvent;
use super::validation::validate_spec;
use crate::crd::LBRegistrar;

/// Result of a phase handler execution.
#[derive(Debug, Default)]
pub struct PhaseResult {
    /// Lifecycle event produced by the phase, if any.
    pub event: Option<RegistrarEvent>,
    /// Human readable description, used as the event note on failure.
    pub message: Option<String>,
    /// Failure that ended the phase.
    pub error: Option<Error>,
    /// Backend sets pushed during the phase.
    pub reports: Vec<SyncReport>,
}

impl PhaseResult {
    /// Phase completed and produced `event`.
    pub fn advance(event: RegistrarEvent) -> Self {
        Self {
            event: Some(event),
            ..Default::default()
        }
    }

    /// Phase failed with `error`, described by `context`.
    pub fn failed(event: RegistrarEvent, context: &str, error: Error) -> Self {
        Self {
            event: Some(event),
            message: Some(format!("{context}: {error}")),
            error: Some(error),
            reports: Vec::new(),
        }
    }

    /// Nothing to do in this phase.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn with_reports(mut self, reports: Vec<SyncReport>) -> Self {
        self.reports = reports;
        self
    }
}

/// `New`: accept the registrar without side effects.
pub fn handle_new(registrar: &LBRegistrar) -> PhaseResult {
    info!(name = %registrar.name_any(), "Accepting new registrar");
    PhaseResult::advance(RegistrarEvent::Accepted)
}

/// `Pending`: build the provider and probe the backend set.
pub async fn handle_pending(registrar: &LBRegistrar, ctx: &Context) -> PhaseResult {
    let name = registrar.name_any();
    let spec = &registrar.spec;

    if let Err(e) = validate_spec(spec) {
        return PhaseResult::failed(
            RegistrarEvent::ProviderFailed,
            "invalid registrar spec",
            e,
        );
    }

    let provider = match ctx.providers.connect(registrar).await {
        Ok(provider) => provider,
        Err(e) => {
            return PhaseResult::failed(
                RegistrarEvent::ProviderFailed,
                "unable to create configuration provider",
                e,
            );
        }
    };

    match provider
        .get_current_backends(&spec.load_balancer_id, &spec.backend_set_name)
        .await
    {
        Ok(backends) => {
            info!(
                name = %name,
                kind = %provider.kind(),
                backend_set = %spec.backend_set_name,
                count = backends.len(),
                "Got current backends"
            );
            debug!(name = %name, backends = ?backends, "Current backends");
            PhaseResult::advance(RegistrarEvent::ProviderVerified)
        }
        Err(e) => PhaseResult::failed(
            RegistrarEvent::ProviderFailed,
            "unable to get backend set",
            e.into(),
        ),
    }
}

/// `Registering`: compute and push the backends of every backend set.
pub async fn handle_registering(registrar: &LBRegistrar, ctx: &Context) -> PhaseResult {
    if let Err(e) = validate_spec(&registrar.spec) {
        return PhaseResult::failed(
            RegistrarEvent::ProviderFailed,
            "invalid registrar spec",
            e,
        );
    }

    let provider = match ctx.providers.connect(registrar).await {
        Ok(provider) => provider,
        Err(e) => {
            return PhaseResult::failed(
                RegistrarEvent::ProviderFailed,
                "unable to create configuration provider",
                e,
            );
        }
    };

    match register(&registrar.spec, ctx.inventory.as_ref(), provider.as_ref()).await {
        Ok(reports) => {
            PhaseResult::advance(RegistrarEvent::BackendsSynced).with_reports(reports)
        }
        Err(e) => {
            if e.needs_intervention() {
                warn!(
                    name = %registrar.name_any(),
                    error = %e,
                    "Registration blocked until the referenced service is fixed"
                );
            }
            PhaseResult::failed(RegistrarEvent::SyncFailed, "unable to register backends", e)
        }
    }
}

/// `Ready`: nothing to do unless the spec was edited.
pub fn handle_ready(registrar: &LBRegistrar) -> PhaseResult {
    if registrar.spec_changed() {
        info!(
            name = %registrar.name_any(),
            generation = ?registrar.metadata.generation,
            observed_generation = ?registrar.observed_generation(),
            "Spec changed, re-registering"
        );
        return PhaseResult::advance(RegistrarEvent::SpecChanged);
    }
    PhaseResult::idle()
}
