//! Secret value lookup for the API signing key.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors raised while reading a secret value.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("secret {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("key {key} not found in secret {namespace}/{name}")]
    MissingKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("key {key} in secret {namespace}/{name} is not valid UTF-8")]
    NotUtf8 {
        namespace: String,
        name: String,
        key: String,
    },
}

/// Reads a single value out of a Secret.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str, key: &str)
    -> Result<String, SecretError>;
}

/// `SecretStore` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String, SecretError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await?
            .ok_or_else(|| SecretError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        secret_value(&secret, namespace, name, key)
    }
}

/// Extract and decode `key` from a fetched secret.
pub fn secret_value(
    secret: &Secret,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String, SecretError> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| SecretError::MissingKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        })?;

    String::from_utf8(bytes.0.clone()).map_err(|_| SecretError::NotUtf8 {
        namespace: namespace.to_string(),
        name: name.to_string(),
        key: key.to_string(),
    })
}
