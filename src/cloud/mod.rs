//! OCI load balancer backend synchronization.
//!
//! Two load balancer flavors are supported. The flavor is chosen from the
//! load balancer identifier: identifiers containing `.networkloadbalancer.`
//! address a network load balancer, everything else a classic one.

pub mod classic;
pub mod credentials;
pub mod http;
pub mod network;
pub mod provider;
pub mod work_request;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::crd::NETWORK_LOAD_BALANCER_MARKER;
use crate::targets::BackendTarget;
use classic::{ClassicLoadBalancerClient, ClassicProvider};
use self::http::SignedClient;
use network::{NetworkLoadBalancerClient, NetworkProvider};
use work_request::CompletionTracker;

/// Errors raised by the cloud APIs.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCI API error ({status} {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        opc_request_id: Option<String>,
    },

    #[error("invalid request: {0}")]
    Request(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("failed to sign request: {0}")]
    Signing(String),

    #[error("no backends found for backend set {0}")]
    NoBackends(String),

    #[error("work request {0} failed")]
    OperationFailed(String),

    #[error("work request {0} was canceled")]
    OperationCanceled(String),

    #[error("timed out waiting for work request {id} after {attempts} attempts")]
    OperationTimedOut { id: String, attempts: u32 },

    #[error("wait for work request {0} was cancelled")]
    Cancelled(String),
}

/// Load balancer flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadBalancerKind {
    Classic,
    Network,
}

impl LoadBalancerKind {
    pub fn detect(load_balancer_id: &str) -> Self {
        if load_balancer_id.contains(NETWORK_LOAD_BALANCER_MARKER) {
            LoadBalancerKind::Network
        } else {
            LoadBalancerKind::Classic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerKind::Classic => "classic",
            LoadBalancerKind::Network => "network",
        }
    }
}

impl std::fmt::Display for LoadBalancerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads and replaces the backends of a backend set.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackendSync: Send + Sync {
    fn kind(&self) -> LoadBalancerKind;

    async fn get_current_backends(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
    ) -> Result<Vec<BackendTarget>, CloudError>;

    async fn sync_backends(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
        targets: &[BackendTarget],
    ) -> Result<(), CloudError>;
}

/// Provider for one load balancer, selected by its identifier.
#[derive(Clone)]
pub enum LoadBalancer {
    Classic(ClassicProvider),
    Network(NetworkProvider),
}

impl LoadBalancer {
    pub fn for_id(
        load_balancer_id: &str,
        region: &str,
        http: SignedClient,
        tracker: CompletionTracker,
    ) -> Self {
        match LoadBalancerKind::detect(load_balancer_id) {
            LoadBalancerKind::Classic => LoadBalancer::Classic(ClassicProvider::new(
                std::sync::Arc::new(ClassicLoadBalancerClient::new(http, region)),
            )),
            LoadBalancerKind::Network => LoadBalancer::Network(NetworkProvider::from_client(
                NetworkLoadBalancerClient::new(http, region),
                tracker,
            )),
        }
    }
}

#[async_trait]
impl BackendSync for LoadBalancer {
    fn kind(&self) -> LoadBalancerKind {
        match self {
            LoadBalancer::Classic(_) => LoadBalancerKind::Classic,
            LoadBalancer::Network(_) => LoadBalancerKind::Network,
        }
    }

    async fn get_current_backends(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
    ) -> Result<Vec<BackendTarget>, CloudError> {
        match self {
            LoadBalancer::Classic(p) => p.get_current_backends(load_balancer_id, backend_set).await,
            LoadBalancer::Network(p) => p.get_current_backends(load_balancer_id, backend_set).await,
        }
    }

    async fn sync_backends(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
        targets: &[BackendTarget],
    ) -> Result<(), CloudError> {
        match self {
            LoadBalancer::Classic(p) => {
                p.sync_backends(load_balancer_id, backend_set, targets).await
            }
            LoadBalancer::Network(p) => {
                p.sync_backends(load_balancer_id, backend_set, targets).await
            }
        }
    }
}
