// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! OCI load balancer clients against a mock HTTP server.
//!
//! Verifies request signing headers, the update bodies sent for both load
//! balancer flavors, work request polling and API error mapping.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lb_registrar_operator::cloud::classic::{ClassicLoadBalancerClient, ClassicProvider};
use lb_registrar_operator::cloud::credentials::{ApiKey, RequestSigner};
use lb_registrar_operator::cloud::http::SignedClient;
use lb_registrar_operator::cloud::network::{NetworkLoadBalancerClient, NetworkProvider};
use lb_registrar_operator::cloud::work_request::CompletionTracker;
use lb_registrar_operator::cloud::CloudError;
use lb_registrar_operator::targets::BackendTarget;

const PEM: &str = include_str!("../fixtures/oci_api_key.pem");
const CLASSIC_ID: &str = "ocid1.loadbalancer.oc1.ap-tokyo-1.aaaa";
const NETWORK_ID: &str = "ocid1.networkloadbalancer.oc1.ap-tokyo-1.bbbb";

fn signed_client() -> SignedClient {
    let api_key = ApiKey {
        tenancy: "ocid1.tenancy.oc1..t".to_string(),
        user: "ocid1.user.oc1..u".to_string(),
        fingerprint: "12:34".to_string(),
        region: "ap-tokyo-1".to_string(),
    };
    SignedClient::new(RequestSigner::from_pem(&api_key, PEM).unwrap()).unwrap()
}

fn targets() -> Vec<BackendTarget> {
    vec![
        BackendTarget::new("10.0.0.1", 30080, 5),
        BackendTarget::new("10.0.0.2", 30080, 5),
    ]
}

fn fast_tracker() -> CompletionTracker {
    CompletionTracker::new(Duration::from_millis(10), 5, CancellationToken::new())
}

// ============================================================================
// Classic load balancer
// ============================================================================

mod classic {
    use super::*;

    fn backend_set_body() -> serde_json::Value {
        json!({
            "name": "http",
            "policy": "ROUND_ROBIN",
            "backends": [
                {"name": "10.0.0.9:30080", "ipAddress": "10.0.0.9", "port": 30080, "weight": 1}
            ],
            "healthChecker": {
                "protocol": "HTTP",
                "port": 10256,
                "urlPath": "/healthz",
                "returnCode": 200
            },
            "sessionPersistenceConfiguration": {
                "cookieName": "route",
                "disableFallback": true
            },
            "backendMaxConnections": 512
        })
    }

    fn provider(server: &MockServer) -> ClassicProvider {
        ClassicProvider::new(Arc::new(ClassicLoadBalancerClient::new_with_base_url(
            signed_client(),
            server.uri(),
        )))
    }

    #[tokio::test]
    async fn test_get_current_backends_signs_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/loadBalancers/{CLASSIC_ID}/backendSets/http")))
            .and(header_exists("authorization"))
            .and(header_exists("date"))
            .respond_with(ResponseTemplate::new(200).set_body_json(backend_set_body()))
            .expect(1)
            .mount(&server)
            .await;

        let backends = provider(&server)
            .get_current_backends(CLASSIC_ID, "http")
            .await
            .unwrap();
        assert_eq!(backends, vec![BackendTarget::new("10.0.0.9", 30080, 1)]);

        let requests = server.received_requests().await.unwrap();
        let authorization = requests[0].headers["authorization"].to_str().unwrap();
        assert!(authorization.starts_with(r#"Signature version="1","#));
        assert!(authorization.contains(r#"keyId="ocid1.tenancy.oc1..t/ocid1.user.oc1..u/12:34""#));
        assert!(authorization.contains(r#"headers="date (request-target) host""#));
    }

    #[tokio::test]
    async fn test_sync_echoes_backend_set_configuration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/loadBalancers/{CLASSIC_ID}/backendSets/http")))
            .respond_with(ResponseTemplate::new(200).set_body_json(backend_set_body()))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/loadBalancers/{CLASSIC_ID}/backendSets/http")))
            .and(header_exists("x-content-sha256"))
            .and(body_partial_json(json!({
                "policy": "ROUND_ROBIN",
                "healthChecker": {"protocol": "HTTP", "port": 10256, "urlPath": "/healthz"},
                "sessionPersistenceConfiguration": {"cookieName": "route", "disableFallback": true},
                "backendMaxConnections": 512,
                "backends": [
                    {"ipAddress": "10.0.0.1", "port": 30080, "weight": 5},
                    {"ipAddress": "10.0.0.2", "port": 30080, "weight": 5}
                ]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .sync_backends(CLASSIC_ID, "http", &targets())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(404)
                    .insert_header("opc-request-id", "req-123")
                    .set_body_json(json!({
                        "code": "NotAuthorizedOrNotFound",
                        "message": "Authorization failed or requested resource not found."
                    })),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .get_current_backends(CLASSIC_ID, "http")
            .await
            .unwrap_err();
        match err {
            CloudError::Api {
                status,
                code,
                opc_request_id,
                ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(code, "NotAuthorizedOrNotFound");
                assert_eq!(opc_request_id.as_deref(), Some("req-123"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_snapshot_skips_update() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let err = provider(&server)
            .sync_backends(CLASSIC_ID, "http", &targets())
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Api { status: 500, .. }));
    }
}

// ============================================================================
// Network load balancer
// ============================================================================

mod network {
    use super::*;

    fn backend_set_body() -> serde_json::Value {
        json!({
            "name": "tcp",
            "policy": "FIVE_TUPLE",
            "backends": [],
            "isPreserveSource": true,
            "isFailOpen": false,
            "ipVersion": "IPV4",
            "healthChecker": {
                "protocol": "TCP",
                "port": 30080,
                "requestData": "cGluZw==",
                "responseData": "cG9uZw=="
            }
        })
    }

    fn provider(server: &MockServer) -> NetworkProvider {
        NetworkProvider::from_client(
            NetworkLoadBalancerClient::new_with_base_url(signed_client(), server.uri()),
            fast_tracker(),
        )
    }

    async fn mount_backend_set(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(format!("/networkLoadBalancers/{NETWORK_ID}/backendSets/tcp")))
            .respond_with(ResponseTemplate::new(200).set_body_json(backend_set_body()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_sync_waits_for_work_request() {
        let server = MockServer::start().await;
        mount_backend_set(&server).await;
        Mock::given(method("PUT"))
            .and(path(format!("/networkLoadBalancers/{NETWORK_ID}/backendSets/tcp")))
            .and(body_partial_json(json!({
                "policy": "FIVE_TUPLE",
                "isPreserveSource": true,
                "isFailOpen": false,
                "ipVersion": "IPV4",
                "healthChecker": {"requestData": "cGluZw==", "responseData": "cG9uZw=="},
                "backends": [
                    {"ipAddress": "10.0.0.1", "port": 30080, "weight": 5},
                    {"ipAddress": "10.0.0.2", "port": 30080, "weight": 5}
                ]
            })))
            .respond_with(ResponseTemplate::new(202).insert_header("opc-work-request-id", "wr-1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/workRequests/wr-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "IN_PROGRESS"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/workRequests/wr-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "SUCCEEDED"})))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .sync_backends(NETWORK_ID, "tcp", &targets())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_work_request_fails_sync() {
        let server = MockServer::start().await;
        mount_backend_set(&server).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(202).insert_header("opc-work-request-id", "wr-2"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/workRequests/wr-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "FAILED"})))
            .mount(&server)
            .await;

        let err = provider(&server)
            .sync_backends(NETWORK_ID, "tcp", &targets())
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::OperationFailed(_)));
    }

    #[tokio::test]
    async fn test_empty_targets_are_rejected_without_update() {
        let server = MockServer::start().await;
        mount_backend_set(&server).await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let err = provider(&server)
            .sync_backends(NETWORK_ID, "tcp", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NoBackends(ref set) if set == "tcp"));
    }
}
