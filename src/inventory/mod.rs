//! Cluster inventory reads.
//!
//! Resolves service references to node ports and lists the nodes that
//! should receive traffic, optionally narrowed to the nodes hosting ready
//! endpoints of a service.

pub mod secrets;

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ListParams;
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::ServiceReference;

/// Service type whose ports carry node ports.
const NODE_PORT_SERVICE_TYPE: &str = "NodePort";

/// Errors raised while reading cluster state.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("service {0} is not of type NodePort")]
    NotNodePort(String),

    #[error("nodePort is not allocated for port {port} in service {service}")]
    NodePortUnallocated { service: String, port: String },

    #[error("no matching port found for {port} in service {service}")]
    NoMatchingPort { service: String, port: String },

    #[error("failed to get endpoints {0}")]
    EndpointsNotFound(String),

    #[error("no nodes are serving endpoints of service {0}")]
    NoServingNodes(String),
}

/// Read access to the cluster objects that decide backend membership.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// Resolve a service port reference to its allocated node port.
    async fn resolve_node_port(&self, reference: &ServiceReference) -> Result<i32, InventoryError>;

    /// Nodes hosting ready endpoints of the referenced service.
    ///
    /// An endpoints object without ready addresses yields an empty list.
    async fn nodes_for_service(
        &self,
        reference: &ServiceReference,
    ) -> Result<Vec<Node>, InventoryError>;

    /// Every node of the cluster.
    async fn all_nodes(&self) -> Result<Vec<Node>, InventoryError>;
}

/// `ClusterInventory` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeInventory {
    client: Client,
}

impl KubeInventory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterInventory for KubeInventory {
    async fn resolve_node_port(&self, reference: &ServiceReference) -> Result<i32, InventoryError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &reference.namespace);
        let service = api
            .get_opt(&reference.name)
            .await?
            .ok_or_else(|| InventoryError::ServiceNotFound(reference.key()))?;

        let node_port = node_port_for(&service, &reference.port)?;
        info!(service = %reference.key(), node_port, "Resolved service node port");
        Ok(node_port)
    }

    async fn nodes_for_service(
        &self,
        reference: &ServiceReference,
    ) -> Result<Vec<Node>, InventoryError> {
        let endpoints_api: Api<Endpoints> =
            Api::namespaced(self.client.clone(), &reference.namespace);
        let endpoints = endpoints_api
            .get_opt(&reference.name)
            .await?
            .ok_or_else(|| InventoryError::EndpointsNotFound(reference.key()))?;

        let ips = endpoint_ips(&endpoints);
        if ips.is_empty() {
            debug!(service = %reference.key(), "Service has no ready endpoints");
            return Ok(Vec::new());
        }

        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), &reference.namespace);
        let pods = pod_api.list(&ListParams::default()).await?.items;
        let nodes = self.all_nodes().await?;

        let serving = nodes_serving(&ips, &pods, nodes);
        debug!(
            service = %reference.key(),
            endpoints = ips.len(),
            nodes = serving.len(),
            "Filtered nodes by service endpoints"
        );
        Ok(serving)
    }

    async fn all_nodes(&self) -> Result<Vec<Node>, InventoryError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?.items;
        debug!(count = nodes.len(), "Listed cluster nodes");
        Ok(nodes)
    }
}

// ============================================================================
// Pure Logic Functions (testable without a cluster)
// ============================================================================

/// Find the node port of the service port matching `port` by number or name.
pub fn node_port_for(service: &Service, port: &IntOrString) -> Result<i32, InventoryError> {
    let key = format!(
        "{}/{}",
        service.metadata.namespace.as_deref().unwrap_or_default(),
        service.metadata.name.as_deref().unwrap_or_default()
    );
    let spec = service.spec.as_ref();

    if spec.and_then(|s| s.type_.as_deref()) != Some(NODE_PORT_SERVICE_TYPE) {
        return Err(InventoryError::NotNodePort(key));
    }

    let wanted = match port {
        IntOrString::Int(n) => n.to_string(),
        IntOrString::String(s) => s.clone(),
    };

    let matched = spec
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
        .find(|p| match port {
            IntOrString::Int(n) => p.port == *n,
            IntOrString::String(name) => p.name.as_deref() == Some(name.as_str()),
        });

    match matched {
        Some(p) => match p.node_port {
            Some(node_port) if node_port != 0 => Ok(node_port),
            _ => Err(InventoryError::NodePortUnallocated {
                service: key,
                port: wanted,
            }),
        },
        None => Err(InventoryError::NoMatchingPort {
            service: key,
            port: wanted,
        }),
    }
}

/// Distinct ready addresses of an endpoints object.
pub fn endpoint_ips(endpoints: &Endpoints) -> BTreeSet<String> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .map(|address| address.ip.clone())
        .collect()
}

/// Names of the nodes running a pod whose IP is in `ips`.
pub fn serving_node_names(ips: &BTreeSet<String>, pods: &[Pod]) -> BTreeSet<String> {
    pods.iter()
        .filter(|pod| pod_ips(pod).any(|ip| ips.contains(ip)))
        .filter_map(|pod| pod.spec.as_ref()?.node_name.clone())
        .collect()
}

/// Keep only the nodes hosting a pod behind one of `ips`.
pub fn nodes_serving(ips: &BTreeSet<String>, pods: &[Pod], nodes: Vec<Node>) -> Vec<Node> {
    let names = serving_node_names(ips, pods);
    nodes
        .into_iter()
        .filter(|node| {
            node.metadata
                .name
                .as_ref()
                .is_some_and(|name| names.contains(name))
        })
        .collect()
}

fn pod_ips(pod: &Pod) -> impl Iterator<Item = &str> {
    let status = pod.status.as_ref();
    let primary = status.and_then(|s| s.pod_ip.as_deref());
    let all = status
        .and_then(|s| s.pod_ips.as_ref())
        .into_iter()
        .flatten()
        .map(|p| p.ip.as_str());
    primary.into_iter().chain(all)
}
