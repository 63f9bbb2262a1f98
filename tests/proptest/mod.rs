// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for lb-registrar-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus, Pod, PodSpec, PodStatus};
use kube::api::ObjectMeta;
use proptest::prelude::*;

use lb_registrar_operator::controller::state_machine::{RegistrarEvent, RegistrarStateMachine};
use lb_registrar_operator::crd::Phase;
use lb_registrar_operator::inventory::nodes_serving;
use lb_registrar_operator::targets::build_targets;

fn any_phase() -> impl Strategy<Value = Phase> {
    prop_oneof![
        Just(Phase::New),
        Just(Phase::Pending),
        Just(Phase::Registering),
        Just(Phase::Ready),
    ]
}

fn any_event() -> impl Strategy<Value = RegistrarEvent> {
    prop_oneof![
        Just(RegistrarEvent::Accepted),
        Just(RegistrarEvent::ProviderVerified),
        Just(RegistrarEvent::ProviderFailed),
        Just(RegistrarEvent::BackendsSynced),
        Just(RegistrarEvent::SyncFailed),
        Just(RegistrarEvent::NodeTopologyChanged),
        Just(RegistrarEvent::EndpointsChanged),
        Just(RegistrarEvent::SpecChanged),
    ]
}

/// A node name and whether the node has an internal address.
fn any_nodes() -> impl Strategy<Value = Vec<(u8, bool)>> {
    prop::collection::vec((any::<u8>(), any::<bool>()), 0..20)
}

fn node(index: u8, addressed: bool) -> Node {
    let address_type = if addressed { "InternalIP" } else { "ExternalIP" };
    Node {
        metadata: ObjectMeta {
            name: Some(format!("node-{index}")),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(vec![NodeAddress {
                type_: address_type.to_string(),
                address: format!("10.0.0.{index}"),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod(index: u8, node_index: u8) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(format!("pod-{index}")),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(format!("node-{node_index}")),
            ..Default::default()
        }),
        status: Some(PodStatus {
            pod_ip: Some(format!("192.168.0.{index}")),
            ..Default::default()
        }),
    }
}

proptest! {
    /// Property: one target per addressed node, in node order.
    #[test]
    fn test_targets_follow_addressed_nodes(
        nodes in any_nodes(),
        port in 1..=65535i32,
        weight in 1..=100i32,
    ) {
        let built: Vec<Node> = nodes.iter().map(|(i, a)| node(*i, *a)).collect();
        let targets = build_targets(&built, port, weight);

        let expected: Vec<String> = nodes
            .iter()
            .filter(|(_, addressed)| *addressed)
            .map(|(i, _)| format!("10.0.0.{i}"))
            .collect();
        let addresses: Vec<String> = targets.iter().map(|t| t.address.clone()).collect();
        prop_assert_eq!(addresses, expected);
        prop_assert!(targets.iter().all(|t| t.port == port && t.weight == weight));
    }

    /// Property: filtering by endpoints yields a duplicate-free subset of the
    /// nodes, empty when the service has no endpoints.
    #[test]
    fn test_serving_nodes_are_subset(
        node_count in 0..10u8,
        placements in prop::collection::vec(0..12u8, 0..15),
        ready in prop::collection::vec(any::<bool>(), 15),
    ) {
        let nodes: Vec<Node> = (0..node_count).map(|i| node(i, true)).collect();
        let pods: Vec<Pod> = placements
            .iter()
            .enumerate()
            .map(|(i, n)| pod(i as u8, *n))
            .collect();
        let ips: BTreeSet<String> = placements
            .iter()
            .enumerate()
            .filter(|(i, _)| ready[*i])
            .map(|(i, _)| format!("192.168.0.{i}"))
            .collect();

        let serving = nodes_serving(&ips, &pods, nodes.clone());
        let names: Vec<String> = serving
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .collect();
        let unique: BTreeSet<&String> = names.iter().collect();
        prop_assert_eq!(unique.len(), names.len());
        prop_assert!(serving.len() <= nodes.len());
        for name in &names {
            let index: u8 = name.trim_start_matches("node-").parse().unwrap();
            prop_assert!(index < node_count);
        }

        let none = nodes_serving(&BTreeSet::new(), &pods, nodes);
        prop_assert!(none.is_empty());
    }

    /// Property: transition checks are deterministic.
    #[test]
    fn test_transitions_deterministic(phase in any_phase(), event in any_event()) {
        let sm = RegistrarStateMachine::new();
        prop_assert_eq!(
            sm.can_transition(&phase, &event),
            sm.can_transition(&phase, &event)
        );
        prop_assert_eq!(sm.next_phase(&phase, event), sm.next_phase(&phase, event));
    }

    /// Property: no event leads back to New.
    #[test]
    fn test_new_is_never_reentered(phase in any_phase(), event in any_event()) {
        let sm = RegistrarStateMachine::new();
        if phase != Phase::New {
            prop_assert_ne!(sm.next_phase(&phase, event), Phase::New);
        }
    }

    /// Property: invalid transitions keep the phase.
    #[test]
    fn test_invalid_transition_keeps_phase(phase in any_phase(), event in any_event()) {
        let sm = RegistrarStateMachine::new();
        if !sm.can_transition(&phase, &event) {
            prop_assert_eq!(sm.next_phase(&phase, event), phase);
        }
    }

    /// Property: persisted phases read back unchanged, anything else is New.
    #[test]
    fn test_phase_wire_format(phase in any_phase(), junk in "[a-z]{1,12}") {
        prop_assert_eq!(Phase::from_wire(phase.as_str()), phase);
        prop_assert_eq!(Phase::from_wire(&junk), Phase::New);
    }
}
