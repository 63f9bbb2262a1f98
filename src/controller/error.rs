//! Error types for the controller.
//!
//! Errors are classified so the reconciler can decide whether a failure
//! sends the registrar back to `Pending` or retries registration in place.

use thiserror::Error;

use crate::cloud::CloudError;
use crate::inventory::InventoryError;
use crate::inventory::secrets::SecretError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A conditional write lost against a newer version of the object
    #[error("Conflicting update of {0}")]
    Conflict(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// API key secret could not be read
    #[error("Failed to read API key: {0}")]
    Secret(#[from] SecretError),

    /// API key material is unusable
    #[error("Failed to create provider: {0}")]
    Credentials(CloudError),

    /// Cluster inventory read failed
    #[error("{0}")]
    Inventory(#[from] InventoryError),

    /// Load balancer call failed
    #[error("Load balancer error: {0}")]
    Cloud(#[from] CloudError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a failure affects the registrar lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The provider cannot be built; the registrar returns to `Pending`.
    Configuration,
    /// Backend registration failed; retried from `Registering`.
    Registration,
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Whether a conditional write was rejected because the object changed
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
            || matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_) | Error::Secret(_) | Error::Credentials(_) => {
                ErrorClass::Configuration
            }
            Error::Kube(_)
            | Error::Conflict(_)
            | Error::Inventory(_)
            | Error::Cloud(_)
            | Error::Serialization(_) => ErrorClass::Registration,
        }
    }

    /// Errors that keep failing until someone edits the spec or the service.
    pub fn needs_intervention(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Inventory(
                    InventoryError::NotNodePort(_)
                        | InventoryError::NodePortUnallocated { .. }
                        | InventoryError::NoMatchingPort { .. }
                )
        )
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
