//! Reconciliation loop for LBRegistrar.
//!
//! One pass runs the handler of the current phase, maps its event through
//! the state machine and persists the resulting phase. The controller
//! runtime serializes passes per object.

use std::sync::Arc;
use std::time::Instant;

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::cloud::LoadBalancerKind;
use crate::controller::context::Context;
use crate::controller::error::{Error, ErrorClass};
use crate::controller::phases::{
    PhaseResult, handle_new, handle_pending, handle_ready, handle_registering,
};
use crate::controller::state_machine::{RegistrarEvent, TransitionResult};
use crate::controller::status::PhaseUpdate;
use crate::crd::{LBRegistrar, Phase};

/// Reconcile an LBRegistrar
pub async fn reconcile(obj: Arc<LBRegistrar>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let current = obj.phase();

    debug!(
        name = %name,
        phase = %current,
        lb_id = %obj.spec.load_balancer_id,
        backend_set = %obj.spec.backend_set_name,
        "Reconciling LBRegistrar"
    );

    let result = match current {
        Phase::New => handle_new(&obj),
        Phase::Pending => handle_pending(&obj, &ctx).await,
        Phase::Registering => handle_registering(&obj, &ctx).await,
        Phase::Ready => handle_ready(&obj),
    };

    let next = next_phase(&ctx, &name, current, result.event);
    let persisted = if next != current {
        persist_phase(&ctx, &obj, next).await
    } else {
        false
    };

    record_sync_metrics(&ctx, &obj, current, &result);
    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_reconcile(&name, start_time.elapsed().as_secs_f64());
        health_state.mark_reconciled();
    }

    let PhaseResult {
        message,
        error,
        reports,
        ..
    } = result;

    if let Some(err) = error {
        error!(name = %name, phase = %current, error = %err, "Reconciliation failed");
        ctx.publish_warning_event(&obj, "Failed", action_for(current), message)
            .await;
        return match err.class() {
            ErrorClass::Registration => {
                if let Some(ref health_state) = ctx.health_state {
                    health_state.metrics.record_error(&name);
                }
                Ok(Action::requeue(ctx.config.registration_retry))
            }
            ErrorClass::Configuration => Err(err),
        };
    }

    if next == Phase::Ready && current != Phase::Ready && persisted {
        let backends: usize = reports.iter().map(|r| r.targets).sum();
        ctx.publish_normal_event(
            &obj,
            "Registered",
            "Registering",
            Some(format!(
                "Registered {} backends in {} backend sets",
                backends,
                reports.len()
            )),
        )
        .await;
    }

    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<LBRegistrar>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    let delay = ctx.config.retry_delay(error.class());
    warn!(name = %name, error = %error, retry_in = ?delay, "Reconciliation error, will retry");
    Action::requeue(delay)
}

fn next_phase(ctx: &Context, name: &str, current: Phase, event: Option<RegistrarEvent>) -> Phase {
    let Some(event) = event else {
        return current;
    };
    match ctx.state_machine.transition(&current, event) {
        TransitionResult::Success {
            from,
            to,
            description,
            ..
        } => {
            if from != to {
                info!(name = %name, from = %from, to = %to, event = %event, "{}", description);
            }
            to
        }
        TransitionResult::InvalidTransition { current, event } => {
            warn!(name = %name, phase = %current, event = %event, "Ignoring invalid transition");
            current
        }
    }
}

/// Write `phase`, conditional on the version this pass read.
///
/// Failures are logged only; the next pass starts from the stored phase.
async fn persist_phase(ctx: &Context, obj: &LBRegistrar, phase: Phase) -> bool {
    let name = obj.name_any();
    match ctx
        .phases
        .set_phase(&name, PhaseUpdate::observed(phase, obj))
        .await
    {
        Ok(()) => true,
        Err(e) if e.is_conflict() => {
            debug!(name = %name, phase = %phase, "Registrar changed during reconcile, dropping write");
            false
        }
        Err(e) => {
            error!(name = %name, phase = %phase, error = %e, "Unable to update LBRegistrar status");
            false
        }
    }
}

fn record_sync_metrics(ctx: &Context, obj: &LBRegistrar, current: Phase, result: &PhaseResult) {
    let Some(ref health_state) = ctx.health_state else {
        return;
    };
    if current != Phase::Registering {
        return;
    }
    let provider = LoadBalancerKind::detect(&obj.spec.load_balancer_id);
    match result.event {
        Some(RegistrarEvent::BackendsSynced) => {
            let name = obj.name_any();
            for report in &result.reports {
                health_state.metrics.record_backend_sync(provider.as_str(), true);
                health_state.metrics.set_backends_registered(
                    &name,
                    &report.backend_set,
                    i64::try_from(report.targets).unwrap_or(i64::MAX),
                );
            }
        }
        Some(RegistrarEvent::SyncFailed) => {
            health_state.metrics.record_backend_sync(provider.as_str(), false);
        }
        _ => {}
    }
}

fn action_for(phase: Phase) -> &'static str {
    match phase {
        Phase::New | Phase::Pending => "Connecting",
        Phase::Registering | Phase::Ready => "Registering",
    }
}
