//! Status writes for LBRegistrar.
//!
//! Phase updates are merge patches against the status subresource. When the
//! caller knows the `resourceVersion` it read, the patch carries it and the
//! API server rejects the write if the object has changed since.

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{Map, Value, json};

#[cfg(test)]
use mockall::automock;

use super::error::{Error, Result};
use crate::crd::{LBRegistrar, LBRegistrarStatus, Phase};

/// Field manager name for status patches
pub const FIELD_MANAGER: &str = "lb-registrar-operator";

/// Phase to persist for one registrar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseUpdate {
    pub phase: Phase,
    /// Generation the phase was derived from; `None` leaves it untouched.
    pub observed_generation: Option<i64>,
    /// Version the write is conditional on; `None` writes unconditionally.
    pub resource_version: Option<String>,
}

impl PhaseUpdate {
    /// Phase write conditional on `registrar` as it was read, keeping the
    /// observed generation.
    pub fn reset(phase: Phase, registrar: &LBRegistrar) -> Self {
        Self {
            phase,
            observed_generation: None,
            resource_version: registrar.metadata.resource_version.clone(),
        }
    }

    /// Phase write derived from `registrar` as it was read.
    pub fn observed(phase: Phase, registrar: &LBRegistrar) -> Self {
        Self {
            phase,
            observed_generation: registrar.metadata.generation,
            resource_version: registrar.metadata.resource_version.clone(),
        }
    }

    /// Merge patch body for this update.
    pub fn to_patch(&self) -> Value {
        let mut status = Map::new();
        status.insert("phase".to_string(), json!(self.phase.as_str()));
        if let Some(generation) = self.observed_generation {
            status.insert("observedGeneration".to_string(), json!(generation));
        }

        let mut patch = Map::new();
        if let Some(ref version) = self.resource_version {
            patch.insert(
                "metadata".to_string(),
                json!({ "resourceVersion": version }),
            );
        }
        patch.insert("status".to_string(), Value::Object(status));
        Value::Object(patch)
    }
}

/// Persists registrar phases.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PhaseStore: Send + Sync {
    async fn set_phase(&self, name: &str, update: PhaseUpdate) -> Result<()>;
}

/// `PhaseStore` writing to the status subresource.
#[derive(Clone)]
pub struct KubePhaseStore {
    client: Client,
}

impl KubePhaseStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PhaseStore for KubePhaseStore {
    async fn set_phase(&self, name: &str, update: PhaseUpdate) -> Result<()> {
        let api: Api<LBRegistrar> = Api::all(self.client.clone());
        match api
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&update.to_patch()),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::Conflict(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Status as it reads after `update` is applied to `current`.
pub fn apply_update(current: Option<&LBRegistrarStatus>, update: &PhaseUpdate) -> LBRegistrarStatus {
    LBRegistrarStatus {
        phase: update.phase,
        observed_generation: update
            .observed_generation
            .or_else(|| current.and_then(|s| s.observed_generation)),
    }
}
