//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler
//! and the trigger loops: cluster reads, the provider factory, status writes
//! and the event recorder.

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

#[cfg(test)]
use mockall::automock;

use super::state_machine::RegistrarStateMachine;
use super::status::{FIELD_MANAGER, KubePhaseStore, PhaseStore};
use crate::cloud::provider::{OciProviderFactory, ProviderFactory};
use crate::cloud::work_request::CompletionTracker;
use crate::config::OperatorConfig;
use crate::crd::LBRegistrar;
use crate::health::HealthState;
use crate::inventory::secrets::KubeSecretStore;
use crate::inventory::{ClusterInventory, KubeInventory};

/// Publishes Kubernetes events about a registrar.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, registrar: &LBRegistrar, event: Event);
}

/// `EventPublisher` backed by the events API.
#[derive(Clone)]
pub struct KubeEventPublisher {
    client: Client,
    reporter: Reporter,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, registrar: &LBRegistrar, event: Event) {
        let object_ref = registrar.object_ref(&());
        if let Err(e) = self.recorder().publish(&event, &object_ref).await {
            tracing::warn!(reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    pub config: OperatorConfig,
    pub inventory: Arc<dyn ClusterInventory>,
    pub providers: Arc<dyn ProviderFactory>,
    pub phases: Arc<dyn PhaseStore>,
    events: Arc<dyn EventPublisher>,
    pub state_machine: Arc<RegistrarStateMachine>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Context wired to the Kubernetes and OCI APIs.
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
        tracker: CompletionTracker,
    ) -> Self {
        let providers = OciProviderFactory::new(
            Arc::new(KubeSecretStore::new(client.clone())),
            config.namespace.clone(),
            tracker,
        );
        Self::with_parts(
            config,
            Arc::new(KubeInventory::new(client.clone())),
            Arc::new(providers),
            Arc::new(KubePhaseStore::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client)),
            health_state,
        )
    }

    /// Context assembled from explicit collaborators.
    pub fn with_parts(
        config: OperatorConfig,
        inventory: Arc<dyn ClusterInventory>,
        providers: Arc<dyn ProviderFactory>,
        phases: Arc<dyn PhaseStore>,
        events: Arc<dyn EventPublisher>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            config,
            inventory,
            providers,
            phases,
            events,
            state_machine: Arc::new(RegistrarStateMachine::new()),
            health_state,
        }
    }

    /// Publish a normal event for a registrar
    pub async fn publish_normal_event(
        &self,
        registrar: &LBRegistrar,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events
            .publish(
                registrar,
                Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
            )
            .await;
    }

    /// Publish a warning event for a registrar
    pub async fn publish_warning_event(
        &self,
        registrar: &LBRegistrar,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events
            .publish(
                registrar,
                Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
            )
            .await;
    }
}
