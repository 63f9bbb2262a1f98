//! Change triggers that send registrars back to `Pending`.
//!
//! Node creation or deletion resets every registrar that is `Registering`
//! or `Ready`. A change to an Endpoints object resets the registrars that
//! filter on that service. Registrars already `New` or `Pending` are left
//! alone, so repeated changes do not produce repeated events.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Node};
use kube::runtime::reflector::Store;
use kube::runtime::watcher::Event;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::Context;
use super::state_machine::RegistrarEvent;
use super::status::PhaseUpdate;
use crate::crd::{LBRegistrar, Phase};

/// Node topology change seen by the node watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeChange {
    Created(String),
    Deleted(String),
    /// A relist found a different set of nodes than before.
    Resynced,
}

/// Tracks node names to tell creations from updates.
#[derive(Debug, Default)]
pub struct NodeTracker {
    known: BTreeSet<String>,
    relisting: BTreeSet<String>,
    seeded: bool,
}

impl NodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a watch event. Updates and the initial listing yield `None`.
    pub fn observe(&mut self, event: &Event<Node>) -> Option<NodeChange> {
        match event {
            Event::Init => {
                self.relisting.clear();
                None
            }
            Event::InitApply(node) => {
                self.relisting.insert(node.name_any());
                None
            }
            Event::InitDone => {
                let listed = std::mem::take(&mut self.relisting);
                let changed = self.seeded && listed != self.known;
                self.known = listed;
                self.seeded = true;
                changed.then_some(NodeChange::Resynced)
            }
            Event::Apply(node) => {
                let name = node.name_any();
                if self.known.insert(name.clone()) {
                    Some(NodeChange::Created(name))
                } else {
                    None
                }
            }
            Event::Delete(node) => {
                let name = node.name_any();
                self.known.remove(&name);
                Some(NodeChange::Deleted(name))
            }
        }
    }

    pub fn known(&self) -> usize {
        self.known.len()
    }
}

/// Namespace and name of a changed Endpoints object.
///
/// The initial listing is not a change.
pub fn endpoints_change(event: &Event<Endpoints>) -> Option<(String, String)> {
    match event {
        Event::Apply(endpoints) | Event::Delete(endpoints) => Some((
            endpoints.namespace().unwrap_or_default(),
            endpoints.name_any(),
        )),
        Event::Init | Event::InitApply(_) | Event::InitDone => None,
    }
}

/// Whether a registrar in `phase` is reset by cluster changes.
pub fn needs_reset(phase: Phase) -> bool {
    matches!(phase, Phase::Registering | Phase::Ready)
}

/// Reset every affected registrar after a node creation or deletion.
///
/// Returns the number of registrars moved to `Pending`.
pub async fn refresh_to_pending(ctx: &Context, registrars: &[Arc<LBRegistrar>]) -> usize {
    let mut reset = 0;
    for registrar in registrars {
        if reset_one(ctx, registrar, RegistrarEvent::NodeTopologyChanged).await {
            ctx.publish_normal_event(
                registrar,
                "PhaseChange",
                "Reset",
                Some(Phase::Pending.as_str().to_string()),
            )
            .await;
            reset += 1;
        }
    }
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_phase_resets("node", reset as u64);
    }
    reset
}

/// Reset the registrars filtering on the endpoints `namespace/name`.
pub async fn refresh_for_endpoints(
    ctx: &Context,
    registrars: &[Arc<LBRegistrar>],
    namespace: &str,
    name: &str,
) -> usize {
    let mut reset = 0;
    for registrar in registrars
        .iter()
        .filter(|r| r.spec.filters_on_endpoints_of(namespace, name))
    {
        if reset_one(ctx, registrar, RegistrarEvent::EndpointsChanged).await {
            ctx.publish_normal_event(
                registrar,
                "EndpointsChanged",
                "Reset",
                Some(format!(
                    "Service {namespace}/{name} endpoints changed, triggering reconciliation"
                )),
            )
            .await;
            reset += 1;
        }
    }
    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_phase_resets("endpoints", reset as u64);
    }
    reset
}

async fn reset_one(ctx: &Context, registrar: &LBRegistrar, event: RegistrarEvent) -> bool {
    let phase = registrar.phase();
    if !needs_reset(phase) {
        return false;
    }
    let next = ctx.state_machine.next_phase(&phase, event);
    let name = registrar.name_any();
    match ctx
        .phases
        .set_phase(&name, PhaseUpdate::reset(next, registrar))
        .await
    {
        Ok(()) => {
            info!(name = %name, from = %phase, to = %next, event = %event, "Reset registrar");
            true
        }
        // The cached copy is behind a write that already moved the phase.
        Err(e) if e.is_conflict() => {
            debug!(name = %name, event = %event, "Registrar changed since cached, skipping reset");
            false
        }
        Err(e) => {
            error!(name = %name, error = %e, "Unable to update LBRegistrar status");
            false
        }
    }
}

/// Watch nodes and reset registrars on creation or deletion.
pub async fn run_node_trigger(
    ctx: Arc<Context>,
    registrars: Store<LBRegistrar>,
    nodes: Api<Node>,
    shutdown: CancellationToken,
) {
    let mut tracker = NodeTracker::new();
    let stream = watcher(nodes, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!(error = %e, "Node watch error");
                    continue;
                }
                None => break,
            },
        };

        match tracker.observe(&event) {
            Some(change) => {
                let count = refresh_to_pending(&ctx, &registrars.state()).await;
                info!(change = ?change, reset = count, "Node topology changed");
            }
            None => {
                if matches!(event, Event::InitDone) {
                    debug!(nodes = tracker.known(), "Node inventory synced");
                }
            }
        }
    }
    info!("Node trigger stopped");
}

/// Watch Endpoints objects and reset registrars filtering on them.
pub async fn run_endpoints_trigger(
    ctx: Arc<Context>,
    registrars: Store<LBRegistrar>,
    endpoints: Api<Endpoints>,
    shutdown: CancellationToken,
) {
    let stream = watcher(endpoints, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!(error = %e, "Endpoints watch error");
                    continue;
                }
                None => break,
            },
        };

        if let Some((namespace, name)) = endpoints_change(&event) {
            let count = refresh_for_endpoints(&ctx, &registrars.state(), &namespace, &name).await;
            if count > 0 {
                info!(service = %format!("{namespace}/{name}"), reset = count, "Endpoints changed");
            }
        }
    }
    info!("Endpoints trigger stopped");
}
