//! Classic OCI load balancer provider.
//!
//! # API Endpoints Used
//!
//! - `GET /loadBalancers/{id}/backendSets/{name}` - Current backend set
//! - `PUT /loadBalancers/{id}/backendSets/{name}` - Replace backends
//!
//! Updates are treated as complete once the PUT is accepted.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use super::CloudError;
use super::http::SignedClient;
use crate::targets::BackendTarget;

/// Load balancer API version path.
const API_VERSION: &str = "20170115";

/// Classic load balancer endpoint for a region.
pub fn endpoint(region: &str) -> String {
    format!("https://iaas.{region}.oraclecloud.com/{API_VERSION}")
}

/// Health checker of a classic backend set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicHealthChecker {
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_force_plain_text: Option<bool>,
}

/// Backend entry as reported by the classic API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicBackend {
    #[serde(default)]
    pub name: String,
    pub ip_address: String,
    pub port: i32,
    #[serde(default)]
    pub weight: i32,
}

/// Backend set configuration echoed unchanged on every update.
///
/// The nested configurations are passed through as received.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicBackendSetOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_persistence_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb_cookie_session_persistence_configuration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_max_connections: Option<i32>,
}

/// Current state of a classic backend set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicBackendSet {
    #[serde(default)]
    pub name: String,
    pub policy: String,
    #[serde(default)]
    pub backends: Vec<ClassicBackend>,
    pub health_checker: ClassicHealthChecker,
    #[serde(flatten)]
    pub options: ClassicBackendSetOptions,
}

/// Backend entry of an update request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassicBackendDetails {
    pub ip_address: String,
    pub port: i32,
    pub weight: i32,
}

/// Body of `UpdateBackendSet`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClassicBackendSet {
    pub policy: String,
    pub backends: Vec<ClassicBackendDetails>,
    pub health_checker: ClassicHealthChecker,
    #[serde(flatten)]
    pub options: ClassicBackendSetOptions,
}

impl UpdateClassicBackendSet {
    /// Replace the backends of `current`, echoing everything else.
    pub fn replacing_backends(current: &ClassicBackendSet, targets: &[BackendTarget]) -> Self {
        Self {
            policy: current.policy.clone(),
            backends: targets
                .iter()
                .map(|t| ClassicBackendDetails {
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

/// Classic load balancer backend set operations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClassicApi: Send + Sync {
    async fn get_backend_set(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
    ) -> Result<ClassicBackendSet, CloudError>;

    async fn update_backend_set(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
        details: &UpdateClassicBackendSet,
    ) -> Result<(), CloudError>;
}

/// REST client for the classic load balancer API.
#[derive(Clone, Debug)]
pub struct ClassicLoadBalancerClient {
    http: SignedClient,
    base_url: String,
}

impl ClassicLoadBalancerClient {
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

    fn backend_set_url(&self, load_balancer_id: &str, backend_set: &str) -> String {
        format!(
            "{}/loadBalancers/{}/backendSets/{}",
            self.base_url, load_balancer_id, backend_set
        )
    }
}

#[async_trait]
impl ClassicApi for ClassicLoadBalancerClient {
    async fn get_backend_set(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
    ) -> Result<ClassicBackendSet, CloudError> {
        self.http
            .get_json(&self.backend_set_url(load_balancer_id, backend_set))
            .await
    }

    async fn update_backend_set(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
        details: &UpdateClassicBackendSet,
    ) -> Result<(), CloudError> {
        self.http
            .put_json(&self.backend_set_url(load_balancer_id, backend_set), details)
            .await?;
        Ok(())
    }
}

/// Backend synchronization against a classic load balancer.
#[derive(Clone)]
pub struct ClassicProvider {
    api: Arc<dyn ClassicApi>,
}

impl ClassicProvider {
    pub fn new(api: Arc<dyn ClassicApi>) -> Self {
        Self { api }
    }

    pub async fn get_current_backends(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
    ) -> Result<Vec<BackendTarget>, CloudError> {
        let current = self.api.get_backend_set(load_balancer_id, backend_set).await?;
        debug!(backend_set, count = current.backends.len(), "Got classic backend set");
        Ok(current
            .backends
            .iter()
            .map(|b| BackendTarget::new(b.ip_address.clone(), b.port, b.weight))
            .collect())
    }

    /// Replace the backends of `backend_set` with `targets`.
    pub async fn sync_backends(
        &self,
        load_balancer_id: &str,
        backend_set: &str,
        targets: &[BackendTarget],
    ) -> Result<(), CloudError> {
        let current = self.api.get_backend_set(load_balancer_id, backend_set).await?;
        let details = UpdateClassicBackendSet::replacing_backends(&current, targets);

        self.api
            .update_backend_set(load_balancer_id, backend_set, &details)
            .await?;
        info!(
            backend_set,
            backends = details.backends.len(),
            "Updated classic backend set"
        );
        Ok(())
    }
}
