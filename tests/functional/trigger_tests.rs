//! Node and endpoints changes resetting registrars to `PENDING`.

use lb_registrar_operator::controller::triggers::{refresh_for_endpoints, refresh_to_pending};
use lb_registrar_operator::crd::{LBRegistrarStatus, Phase};

use crate::mock_state::*;

fn with_phase(name: &str, phase: Phase) -> lb_registrar_operator::crd::LBRegistrar {
    let mut r = registrar(name, spec(CLASSIC_LB, 30080));
    r.status = Some(LBRegistrarStatus {
        phase,
        observed_generation: Some(1),
    });
    r
}

#[tokio::test]
async fn test_node_change_resets_ready_once() {
    let h = Harness::classic_two_nodes();
    h.store.insert(with_phase("ingress", Phase::Ready));

    assert_eq!(refresh_to_pending(&h.ctx, &h.store.all()).await, 1);
    assert_eq!(h.phase("ingress"), Phase::Pending);

    let events = h.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "PhaseChange");
    assert_eq!(events[0].note.as_deref(), Some("PENDING"));

    // A second deletion while still Pending changes nothing.
    assert_eq!(refresh_to_pending(&h.ctx, &h.store.all()).await, 0);
    assert_eq!(h.events.all().len(), 1);
}

#[tokio::test]
async fn test_stale_cache_does_not_reset_twice() {
    let h = Harness::classic_two_nodes();
    h.store.insert(with_phase("ingress", Phase::Ready));

    // Both deletions are handled before the cache sees the first reset.
    let cached = h.store.all();
    assert_eq!(refresh_to_pending(&h.ctx, &cached).await, 1);
    assert_eq!(refresh_to_pending(&h.ctx, &cached).await, 0);

    assert_eq!(h.phase("ingress"), Phase::Pending);
    assert_eq!(h.events.all().len(), 1);
    assert_eq!(h.store.writes().len(), 1);
}

#[tokio::test]
async fn test_node_change_skips_new_and_pending() {
    let h = Harness::classic_two_nodes();
    h.store.insert(with_phase("a-new", Phase::New));
    h.store.insert(with_phase("b-pending", Phase::Pending));
    h.store.insert(with_phase("c-registering", Phase::Registering));
    h.store.insert(with_phase("d-ready", Phase::Ready));

    assert_eq!(refresh_to_pending(&h.ctx, &h.store.all()).await, 2);

    assert_eq!(h.phase("a-new"), Phase::New);
    assert_eq!(h.phase("b-pending"), Phase::Pending);
    assert_eq!(h.phase("c-registering"), Phase::Pending);
    assert_eq!(h.phase("d-ready"), Phase::Pending);
}

#[tokio::test]
async fn test_reset_keeps_observed_generation() {
    let h = Harness::classic_two_nodes();
    h.store.insert(with_phase("ingress", Phase::Ready));

    refresh_to_pending(&h.ctx, &h.store.all()).await;
    assert_eq!(h.store.get("ingress").observed_generation(), Some(1));
}

#[tokio::test]
async fn test_endpoints_change_resets_only_filtering_registrars() {
    let h = Harness::classic_two_nodes();

    let mut filtered = with_phase("filtered", Phase::Ready);
    let mut nginx = service_ref("ingress", "nginx", "http");
    nginx.filter_by_endpoints = true;
    filtered.spec.services = vec![nginx];
    h.store.insert(filtered);

    let mut unfiltered = with_phase("unfiltered", Phase::Ready);
    unfiltered.spec.services = vec![service_ref("ingress", "nginx", "http")];
    h.store.insert(unfiltered);

    let mut other = with_phase("other", Phase::Ready);
    let mut api = service_ref("web", "api", "http");
    api.filter_by_endpoints = true;
    other.spec.services = vec![api];
    h.store.insert(other);

    let reset = refresh_for_endpoints(&h.ctx, &h.store.all(), "ingress", "nginx").await;
    assert_eq!(reset, 1);
    assert_eq!(h.phase("filtered"), Phase::Pending);
    assert_eq!(h.phase("unfiltered"), Phase::Ready);
    assert_eq!(h.phase("other"), Phase::Ready);

    let events = h.events.all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].registrar, "filtered");
    assert_eq!(events[0].reason, "EndpointsChanged");
    assert_eq!(
        events[0].note.as_deref(),
        Some("Service ingress/nginx endpoints changed, triggering reconciliation")
    );
}

#[tokio::test]
async fn test_endpoints_change_matches_legacy_service() {
    let h = Harness::classic_two_nodes();
    let mut legacy = with_phase("legacy", Phase::Registering);
    let mut nginx = service_ref("ingress", "nginx", "http");
    nginx.filter_by_endpoints = true;
    legacy.spec.service = Some(nginx);
    h.store.insert(legacy);

    assert_eq!(
        refresh_for_endpoints(&h.ctx, &h.store.all(), "ingress", "nginx").await,
        1
    );
    assert_eq!(
        refresh_for_endpoints(&h.ctx, &h.store.all(), "ingress", "nginx").await,
        0
    );
}
