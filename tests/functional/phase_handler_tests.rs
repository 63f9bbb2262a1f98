//! Tests for the individual phase handlers.

use std::sync::atomic::Ordering;

use lb_registrar_operator::cloud::LoadBalancerKind;
use lb_registrar_operator::controller::error::ErrorClass;
use lb_registrar_operator::controller::phases::{
    handle_new, handle_pending, handle_ready, handle_registering,
};
use lb_registrar_operator::controller::state_machine::RegistrarEvent;
use lb_registrar_operator::crd::{LBRegistrarStatus, Phase};
use lb_registrar_operator::targets::BackendTarget;

use crate::mock_state::*;

#[test]
fn test_new_is_accepted() {
    let r = registrar("web", spec(CLASSIC_LB, 30080));
    let result = handle_new(&r);
    assert_eq!(result.event, Some(RegistrarEvent::Accepted));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_pending_probe_success_verifies_provider() {
    let h = Harness::classic_two_nodes();
    let r = registrar("web", spec(CLASSIC_LB, 30080));

    let result = handle_pending(&r, &h.ctx).await;
    assert_eq!(result.event, Some(RegistrarEvent::ProviderVerified));
    assert!(result.error.is_none());
    assert!(h.load_balancer.pushes().is_empty());
}

#[tokio::test]
async fn test_pending_connect_failure_is_configuration_error() {
    let h = Harness::classic_two_nodes();
    h.providers.fail_connect.store(true, Ordering::SeqCst);
    let r = registrar("web", spec(CLASSIC_LB, 30080));

    let result = handle_pending(&r, &h.ctx).await;
    assert_eq!(result.event, Some(RegistrarEvent::ProviderFailed));
    assert_eq!(
        result.error.as_ref().map(|e| e.class()),
        Some(ErrorClass::Configuration)
    );
    assert!(
        result
            .message
            .unwrap()
            .starts_with("unable to create configuration provider")
    );
}

#[tokio::test]
async fn test_pending_probe_failure_is_registration_error() {
    let h = Harness::classic_two_nodes();
    h.load_balancer.fail_probe.store(true, Ordering::SeqCst);
    let r = registrar("web", spec(CLASSIC_LB, 30080));

    let result = handle_pending(&r, &h.ctx).await;
    assert_eq!(result.event, Some(RegistrarEvent::ProviderFailed));
    assert_eq!(
        result.error.as_ref().map(|e| e.class()),
        Some(ErrorClass::Registration)
    );
    assert!(result.message.unwrap().starts_with("unable to get backend set"));
}

#[tokio::test]
async fn test_pending_rejects_invalid_spec_before_connecting() {
    let h = Harness::classic_two_nodes();
    h.providers.fail_connect.store(true, Ordering::SeqCst);
    let mut s = spec(CLASSIC_LB, 0);
    s.backend_set_name.clear();
    let r = registrar("web", s);

    let result = handle_pending(&r, &h.ctx).await;
    assert_eq!(result.event, Some(RegistrarEvent::ProviderFailed));
    assert!(result.message.unwrap().starts_with("invalid registrar spec"));
}

#[tokio::test]
async fn test_registering_reports_every_backend_set() {
    let h = Harness::classic_two_nodes();
    h.inventory.set_node_port("web/frontend", 30080);
    h.inventory.set_node_port("web/api", 30443);

    let mut s = spec(CLASSIC_LB, 0);
    let mut api = service_ref("web", "api", "https");
    api.backend_set_name = Some("https".to_string());
    s.services = vec![service_ref("web", "frontend", "http"), api];
    let r = registrar("web", s);

    let result = handle_registering(&r, &h.ctx).await;
    assert_eq!(result.event, Some(RegistrarEvent::BackendsSynced));
    assert_eq!(result.reports.len(), 2);
    assert_eq!(result.reports[0].backend_set, "http");
    assert_eq!(result.reports[1].backend_set, "https");
    assert_eq!(
        h.load_balancer.backends("https"),
        vec![
            BackendTarget::new("10.0.0.1", 30443, 1),
            BackendTarget::new("10.0.0.2", 30443, 1),
        ]
    );
}

#[tokio::test]
async fn test_registering_push_failure_is_sync_failed() {
    let h = Harness::classic_two_nodes();
    h.load_balancer.fail_sync.store(true, Ordering::SeqCst);
    let r = registrar("web", spec(CLASSIC_LB, 30080));

    let result = handle_registering(&r, &h.ctx).await;
    assert_eq!(result.event, Some(RegistrarEvent::SyncFailed));
    assert!(
        result
            .message
            .unwrap()
            .starts_with("unable to register backends")
    );
}

#[tokio::test]
async fn test_registering_connect_failure_reverts_provider() {
    let h = Harness::classic_two_nodes();
    h.providers.fail_connect.store(true, Ordering::SeqCst);
    let r = registrar("web", spec(CLASSIC_LB, 30080));

    let result = handle_registering(&r, &h.ctx).await;
    assert_eq!(result.event, Some(RegistrarEvent::ProviderFailed));
}

#[tokio::test]
async fn test_registering_unknown_service_fails() {
    let h = Harness::new(LoadBalancerKind::Classic, vec![node("a", "10.0.0.1")]);
    let mut s = spec(CLASSIC_LB, 0);
    s.services = vec![service_ref("web", "missing", "http")];
    let r = registrar("web", s);

    let result = handle_registering(&r, &h.ctx).await;
    assert_eq!(result.event, Some(RegistrarEvent::SyncFailed));
    assert!(result.message.unwrap().contains("service web/missing not found"));
    assert!(h.load_balancer.pushes().is_empty());
}

#[test]
fn test_ready_is_idle_until_spec_changes() {
    let mut r = registrar("web", spec(CLASSIC_LB, 30080));
    r.status = Some(LBRegistrarStatus {
        phase: Phase::Ready,
        observed_generation: Some(1),
    });
    assert!(handle_ready(&r).event.is_none());

    r.metadata.generation = Some(2);
    assert_eq!(handle_ready(&r).event, Some(RegistrarEvent::SpecChanged));
}
