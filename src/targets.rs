//! Backend target computation.
//!
//! Turns a resolved port, a weight and a node list into the backend list
//! pushed to the load balancer.

use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};

/// Node address type registered with the load balancer.
const INTERNAL_IP: &str = "InternalIP";

/// An (address, port, weight) backend of a load balancer backend set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendTarget {
    pub address: String,
    pub port: i32,
    pub weight: i32,
}

impl BackendTarget {
    pub fn new(address: impl Into<String>, port: i32, weight: i32) -> Self {
        Self {
            address: address.into(),
            port,
            weight,
        }
    }
}

impl std::fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} (weight {})", self.address, self.port, self.weight)
    }
}

/// First internal IP address of a node.
pub fn internal_ip(node: &Node) -> Option<&str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == INTERNAL_IP)
        .map(|a| a.address.as_str())
}

/// Build one target per node that has an internal address.
///
/// Nodes without an internal address are skipped. Order follows `nodes`.
pub fn build_targets(nodes: &[Node], port: i32, weight: i32) -> Vec<BackendTarget> {
    nodes
        .iter()
        .filter_map(|node| {
            let address = internal_ip(node);
            if address.is_none() {
                tracing::debug!(
                    node = node.metadata.name.as_deref().unwrap_or_default(),
                    "Skipping node without internal address"
                );
            }
            address
        })
        .map(|address| BackendTarget::new(address, port, weight))
        .collect()
}
