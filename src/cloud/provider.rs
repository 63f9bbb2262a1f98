//! Builds a backend sync provider for a registrar.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::credentials::{ApiKey, RequestSigner};
use super::http::SignedClient;
use super::work_request::CompletionTracker;
use super::{BackendSync, LoadBalancer};
use crate::controller::error::{Error, Result};
use crate::crd::LBRegistrar;
use crate::inventory::secrets::SecretStore;

/// Creates a provider from a registrar's API key and load balancer id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn connect(&self, registrar: &LBRegistrar) -> Result<Arc<dyn BackendSync>>;
}

/// `ProviderFactory` that reads the private key from a Secret.
#[derive(Clone)]
pub struct OciProviderFactory {
    secrets: Arc<dyn SecretStore>,
    default_namespace: String,
    tracker: CompletionTracker,
}

impl OciProviderFactory {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        default_namespace: impl Into<String>,
        tracker: CompletionTracker,
    ) -> Self {
        Self {
            secrets,
            default_namespace: default_namespace.into(),
            tracker,
        }
    }

    /// Namespace of the private key secret, defaulting to the operator's.
    fn secret_namespace<'a>(&'a self, registrar: &'a LBRegistrar) -> &'a str {
        let ns = registrar.spec.api_key.private_key.namespace.as_str();
        if ns.is_empty() {
            &self.default_namespace
        } else {
            ns
        }
    }
}

#[async_trait]
impl ProviderFactory for OciProviderFactory {
    async fn connect(&self, registrar: &LBRegistrar) -> Result<Arc<dyn BackendSync>> {
        let api_key_spec = &registrar.spec.api_key;
        let key_ref = &api_key_spec.private_key.secret_key_ref;
        let namespace = self.secret_namespace(registrar);

        let pem = self
            .secrets
            .get_secret(namespace, &key_ref.name, &key_ref.key)
            .await?;

        let api_key = ApiKey::from(api_key_spec);
        let signer = RequestSigner::from_pem(&api_key, &pem).map_err(Error::Credentials)?;
        let http = SignedClient::new(signer).map_err(Error::Credentials)?;

        let provider = LoadBalancer::for_id(
            &registrar.spec.load_balancer_id,
            &api_key.region,
            http,
            self.tracker.clone(),
        );
        debug!(
            name = %registrar.name_any(),
            kind = %provider.kind(),
            region = %api_key.region,
            "Created load balancer provider"
        );
        Ok(Arc::new(provider))
    }
}
