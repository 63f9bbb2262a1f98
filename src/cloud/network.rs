//! OCI network load balancer provider.
//!
//! # API Endpoints Used
//!
//! - `GET /networkLoadBalancers/{id}/backendSets/{name}` - Current backend set
//! - `PUT /networkLoadBalancers/{id}/backendSets/{name}` - Replace backends,
//!   returns an `opc-work-request-id` header
//! - `GET /workRequests/{id}` - Work request status
//!
//! An update is complete only once its work request has succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use super::CloudError;
use super::http::SignedClient;
use super::work_request::{CompletionTracker, OperationStatus, WorkRequestApi};
use crate::targets::BackendTarget;

/// Network load balancer API version path.
const API_VERSION: &str = "20200501";

/// Response header carrying the work request id of an update.
pub const WORK_REQUEST_HEADER: &str = "opc-work-request-id";

/// Network load balancer endpoint for a region.
pub fn endpoint(region: &str) -> String {
    format!("https://network-load-balancer-api.{region}.oci.oraclecloud.com/{API_VERSION}")
}

/// Backend port: the explicit override when set, otherwise the resolved port.
pub fn determine_port(port_override: i32, resolved: i32) -> i32 {
    if port_override != 0 {
        port_override
    } else {
        resolved
    }
}

/// Health checker of a network backend set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkHealthChecker {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_in_millis: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_in_millis: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body_regex: Option<String>,
    /// Base64 payload sent by UDP/TCP health checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<String>,
    /// Base64 payload expected back from UDP/TCP health checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<String>,
}

/// Backend entry as reported by the network API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBackend {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_address: String,
    pub port: i32,
    #[serde(default)]
    pub weight: i32,
}

/// Current state of a network backend set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBackendSet {
    #[serde(default)]
    pub name: String,
    pub policy: String,
    #[serde(default)]
    pub backends: Vec<NetworkBackend>,
    pub health_checker: NetworkHealthChecker,
    #[serde(flatten)]
    pub options: BackendSetOptions,
}

/// Backend set switches echoed unchanged on every update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSetOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_preserve_source: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fail_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_instant_failover_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_instant_failover_tcp_reset_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub are_operationally_active_backends_preferred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<String>,
}

/// Backend entry of an update request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBackendDetails {
    pub ip_address: String,
    pub port: i32,
    pub weight: i32,
}

/// Body of `UpdateBackendSet`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNetworkBackendSet {
    pub policy: String,
    pub backends: Vec<NetworkBackendDetails>,
    pub health_checker: NetworkHealthChecker,
    #[serde(flatten)]
    pub options: BackendSetOptions,
}

impl UpdateNetworkBackendSet {
    /// Replace the backends of `current`, echoing everything else.
    pub fn replacing_backends(current: &NetworkBackendSet, targets: &[BackendTarget]) -> Self {
        Self {
            policy: current.policy.clone(),
            backends: targets
                .iter()
                .map(|t| NetworkBackendDetails {
                    ip_address: t.address.clone(),
                    port: t.port,
                    weight: t.weight,
                })
                .collect(),
            health_checker: current.health_checker.clone(),
            options: current.options.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkRequest {
    status: OperationStatus,
}

/// Network load balancer backend set operations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn get_backend_set(
        &self,
        network_load_balancer_id: &str,
        backend_set: &str,
    ) -> Result<NetworkBackendSet, CloudError>;

    /// Submit an update, returning its work request id if one was issued.
    async fn update_backend_set(
        &self,
        network_load_balancer_id: &str,
        backend_set: &str,
        details: &UpdateNetworkBackendSet,
    ) -> Result<Option<String>, CloudError>;
}

/// REST client for the network load balancer API.
#[derive(Clone, Debug)]
pub struct NetworkLoadBalancerClient {
    http: SignedClient,
    base_url: String,
}

impl NetworkLoadBalancerClient {
    pub fn new(http: SignedClient, region: &str) -> Self {
        Self::new_with_base_url(http, endpoint(region))
    }

    /// Client against an explicit endpoint, including the version path.
    pub fn new_with_base_url(http: SignedClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn backend_set_url(&self, network_load_balancer_id: &str, backend_set: &str) -> String {
        format!(
            "{}/networkLoadBalancers/{}/backendSets/{}",
            self.base_url, network_load_balancer_id, backend_set
        )
    }
}

#[async_trait]
impl NetworkApi for NetworkLoadBalancerClient {
    async fn get_backend_set(
        &self,
        network_load_balancer_id: &str,
        backend_set: &str,
    ) -> Result<NetworkBackendSet, CloudError> {
        self.http
            .get_json(&self.backend_set_url(network_load_balancer_id, backend_set))
            .await
    }

    async fn update_backend_set(
        &self,
        network_load_balancer_id: &str,
        backend_set: &str,
        details: &UpdateNetworkBackendSet,
    ) -> Result<Option<String>, CloudError> {
        let headers = self
            .http
            .put_json(
                &self.backend_set_url(network_load_balancer_id, backend_set),
                details,
            )
            .await?;
        Ok(headers
            .get(WORK_REQUEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}

#[async_trait]
impl WorkRequestApi for NetworkLoadBalancerClient {
    async fn work_request_status(
        &self,
        work_request_id: &str,
    ) -> Result<OperationStatus, CloudError> {
        let url = format!("{}/workRequests/{}", self.base_url, work_request_id);
        let request: WorkRequest = self.http.get_json(&url).await?;
        Ok(request.status)
    }
}

/// Backend synchronization against a network load balancer.
#[derive(Clone)]
pub struct NetworkProvider {
    api: Arc<dyn NetworkApi>,
    work_requests: Arc<dyn WorkRequestApi>,
    tracker: CompletionTracker,
}

impl NetworkProvider {
    pub fn new(
        api: Arc<dyn NetworkApi>,
        work_requests: Arc<dyn WorkRequestApi>,
        tracker: CompletionTracker,
    ) -> Self {
        Self {
            api,
            work_requests,
            tracker,
        }
    }

    /// Provider whose backend set and work request calls share one client.
    pub fn from_client(client: NetworkLoadBalancerClient, tracker: CompletionTracker) -> Self {
        let client = Arc::new(client);
        Self::new(client.clone(), client, tracker)
    }

    pub async fn get_current_backends(
        &self,
        network_load_balancer_id: &str,
        backend_set: &str,
    ) -> Result<Vec<BackendTarget>, CloudError> {
        let current = self
            .api
            .get_backend_set(network_load_balancer_id, backend_set)
            .await?;
        debug!(backend_set, count = current.backends.len(), "Got network backend set");
        Ok(current
            .backends
            .iter()
            .map(|b| BackendTarget::new(b.ip_address.clone(), b.port, b.weight))
            .collect())
    }

    /// Replace the backends of `backend_set` and wait for the update to land.
    ///
    /// An empty `targets` list is rejected rather than draining the set.
    pub async fn sync_backends(
        &self,
        network_load_balancer_id: &str,
        backend_set: &str,
        targets: &[BackendTarget],
    ) -> Result<(), CloudError> {
        let current = self
            .api
            .get_backend_set(network_load_balancer_id, backend_set)
            .await?;

        if targets.is_empty() {
            return Err(CloudError::NoBackends(backend_set.to_string()));
        }
        let details = UpdateNetworkBackendSet::replacing_backends(&current, targets);

        let work_request_id = self
            .api
            .update_backend_set(network_load_balancer_id, backend_set, &details)
            .await?;
        debug!(
            backend_set,
            work_request_id = work_request_id.as_deref().unwrap_or_default(),
            "Submitted network backend set update"
        );

        self.tracker
            .await_completion(self.work_requests.as_ref(), work_request_id.as_deref())
            .await?;
        info!(
            backend_set,
            backends = details.backends.len(),
            "Updated network backend set"
        );
        Ok(())
    }
}
