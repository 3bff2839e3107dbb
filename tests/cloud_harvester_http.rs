//! Mock-server coverage for the cloud metadata harvesters, spec §4.8.
//!
//! Same `axum` + loopback `tokio::net::TcpListener` idiom as
//! `tests/external_http.rs` in the teacher repo, pointed at each
//! harvester's `with_base_url` override instead of the real link-local
//! metadata address.

use axum::{routing::get, routing::put, Json, Router};
use infra_agent_core::cloud::{AwsHarvester, AzureHarvester, CloudHarvester, GcpHarvester};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

async fn spawn(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn aws_harvester_fetches_a_token_before_the_identity_document() {
    let token_calls = Arc::new(AtomicUsize::new(0));
    let token_calls_for_handler = token_calls.clone();

    let app = Router::new()
        .route(
            "/latest/api/token",
            put(move |headers: axum::http::HeaderMap| {
                let token_calls = token_calls_for_handler.clone();
                async move {
                    assert!(headers.get("X-aws-ec2-metadata-token-ttl-seconds").is_some());
                    token_calls.fetch_add(1, Ordering::SeqCst);
                    "fake-imdsv2-token"
                }
            }),
        )
        .route(
            "/latest/dynamic/instance-identity/document",
            get(|headers: axum::http::HeaderMap| async move {
                assert_eq!(
                    headers.get("X-aws-ec2-metadata-token").and_then(|v| v.to_str().ok()),
                    Some("fake-imdsv2-token")
                );
                Json(json!({"instanceId": "i-0123456789abcdef0"}))
            }),
        );

    let (addr, _handle) = spawn(app).await;
    let harvester = AwsHarvester::with_base_url(format!("http://{addr}"));
    let instance_id = harvester.get_instance_id().await.unwrap();

    assert_eq!(instance_id, "i-0123456789abcdef0");
    assert_eq!(token_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn aws_harvester_reuses_the_cached_token_on_a_second_call() {
    let token_calls = Arc::new(AtomicUsize::new(0));
    let token_calls_for_handler = token_calls.clone();

    let app = Router::new()
        .route(
            "/latest/api/token",
            put(move || {
                let token_calls = token_calls_for_handler.clone();
                async move {
                    token_calls.fetch_add(1, Ordering::SeqCst);
                    "fake-imdsv2-token"
                }
            }),
        )
        .route(
            "/latest/dynamic/instance-identity/document",
            get(|| async { Json(json!({"instanceId": "i-cached"})) }),
        );

    let (addr, _handle) = spawn(app).await;
    let harvester = AwsHarvester::with_base_url(format!("http://{addr}"));
    harvester.get_instance_id().await.unwrap();
    harvester.get_instance_id().await.unwrap();

    assert_eq!(token_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn azure_harvester_sends_metadata_true_header() {
    let app = Router::new().route(
        "/metadata/instance",
        get(|headers: axum::http::HeaderMap| async move {
            assert_eq!(headers.get("Metadata").and_then(|v| v.to_str().ok()), Some("true"));
            Json(json!({"compute": {"vmId": "azure-vm-1"}}))
        }),
    );
    let (addr, _handle) = spawn(app).await;
    let harvester = AzureHarvester::with_base_url(format!("http://{addr}"));
    let instance_id = harvester.get_instance_id().await.unwrap();
    assert_eq!(instance_id, "azure-vm-1");
}

#[tokio::test]
async fn gcp_harvester_sends_metadata_flavor_header() {
    let app = Router::new().route(
        "/computeMetadata/v1/instance/",
        get(|headers: axum::http::HeaderMap| async move {
            assert_eq!(
                headers.get("Metadata-Flavor").and_then(|v| v.to_str().ok()),
                Some("Google")
            );
            Json(json!({"id": 1234567890}))
        }),
    );
    let (addr, _handle) = spawn(app).await;
    let harvester = GcpHarvester::with_base_url(format!("http://{addr}"));
    let instance_id = harvester.get_instance_id().await.unwrap();
    assert_eq!(instance_id, "1234567890");
}

#[tokio::test]
async fn unreachable_harvester_surfaces_as_transport_error() {
    let harvester = AzureHarvester::with_base_url("http://127.0.0.1:1");
    let err = harvester.get_instance_id().await.unwrap_err();
    assert!(matches!(err, infra_agent_core::error::AgentError::Transport(_)));
}
