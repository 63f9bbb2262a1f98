//! Backend registration for one LBRegistrar.
//!
//! Two modes exist. With a non-empty `services` list every reference is
//! resolved and pushed on its own, in order, and the first failure aborts
//! the rest. Otherwise the legacy fields (`service`, `nodePort`, `port`)
//! describe a single push to the registrar's backend set.
//!
//! A push never carries an empty backend list unless a service-list
//! reference is filtered on endpoints that currently have no ready pods.

use tracing::{debug, info};

use crate::cloud::network::determine_port;
use crate::cloud::{BackendSync, CloudError, LoadBalancerKind};
use crate::controller::error::{Error, Result};
use crate::crd::{LBRegistrarSpec, ServiceReference};
use crate::inventory::{ClusterInventory, InventoryError};
use crate::targets::{BackendTarget, build_targets};

/// Outcome of one backend set push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub backend_set: String,
    pub targets: usize,
}

/// Push the desired backends of `spec` through `provider`.
pub async fn register(
    spec: &LBRegistrarSpec,
    inventory: &dyn ClusterInventory,
    provider: &dyn BackendSync,
) -> Result<Vec<SyncReport>> {
    if spec.uses_service_list() {
        let mut reports = Vec::with_capacity(spec.services.len());
        for reference in &spec.services {
            reports.push(register_reference(spec, reference, inventory, provider).await?);
        }
        Ok(reports)
    } else {
        Ok(vec![register_legacy(spec, inventory, provider).await?])
    }
}

async fn register_reference(
    spec: &LBRegistrarSpec,
    reference: &ServiceReference,
    inventory: &dyn ClusterInventory,
    provider: &dyn BackendSync,
) -> Result<SyncReport> {
    let resolved = inventory.resolve_node_port(reference).await?;
    let port = match provider.kind() {
        LoadBalancerKind::Network => determine_port(spec.port, resolved),
        LoadBalancerKind::Classic => resolved,
    };
    let weight = reference.weight.filter(|w| *w > 0).unwrap_or(spec.weight);
    let backend_set = reference
        .backend_set_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(&spec.backend_set_name);

    let nodes = if reference.filter_by_endpoints {
        inventory.nodes_for_service(reference).await?
    } else {
        inventory.all_nodes().await?
    };

    let targets = build_targets(&nodes, port, weight);
    debug!(
        service = %reference.key(),
        backend_set,
        port,
        weight,
        nodes = nodes.len(),
        backends = targets.len(),
        "Computed backends for service"
    );
    // Only an endpoint filter may legitimately narrow a reference to nothing.
    if targets.is_empty() && !reference.filter_by_endpoints {
        return Err(CloudError::NoBackends(backend_set.to_string()).into());
    }
    push(spec, backend_set, &targets, provider).await
}

async fn register_legacy(
    spec: &LBRegistrarSpec,
    inventory: &dyn ClusterInventory,
    provider: &dyn BackendSync,
) -> Result<SyncReport> {
    let resolved = match spec.service {
        Some(ref service) => {
            let node_port = inventory.resolve_node_port(service).await?;
            info!(service = %service.key(), node_port, "Using node port from service");
            node_port
        }
        None => spec.node_port,
    };
    let port = determine_port(spec.port, resolved);
    if port == 0 {
        return Err(Error::Validation(
            "no port configured: set nodePort, port or service".to_string(),
        ));
    }

    let nodes = match spec.service {
        Some(ref service) if service.filter_by_endpoints => {
            inventory.nodes_for_service(service).await?
        }
        _ => inventory.all_nodes().await?,
    };

    let targets = build_targets(&nodes, port, spec.weight);
    if targets.is_empty() {
        return Err(match spec.service {
            Some(ref service) if service.filter_by_endpoints => {
                InventoryError::NoServingNodes(service.key()).into()
            }
            _ => CloudError::NoBackends(spec.backend_set_name.clone()).into(),
        });
    }
    push(spec, &spec.backend_set_name, &targets, provider).await
}

async fn push(
    spec: &LBRegistrarSpec,
    backend_set: &str,
    targets: &[BackendTarget],
    provider: &dyn BackendSync,
) -> Result<SyncReport> {
    provider
        .sync_backends(&spec.load_balancer_id, backend_set, targets)
        .await?;
    info!(
        lb_id = %spec.load_balancer_id,
        backend_set,
        backends = targets.len(),
        "Registered backends"
    );
    Ok(SyncReport {
        backend_set: backend_set.to_string(),
        targets: targets.len(),
    })
}
