//! Mock-server coverage for `id_provider::HttpRegisterClient`, spec §4.5/§6.
//!
//! Grounded on the teacher's `start_mock_external` helper in
//! `tests/external_http.rs`: a real `axum::Router` bound to a loopback
//! `tokio::net::TcpListener`, driven with `tokio::spawn`, so the test
//! exercises the actual outbound `reqwest` call rather than stubbing
//! `RegisterClient`.

use axum::{routing::post, Json, Router};
use infra_agent_core::id_provider::{HttpRegisterClient, RegisterClient};
use infra_agent_core::model::EntityRegisterRequest;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

async fn start_mock_collector(
    expected_license_key: &'static str,
) -> (SocketAddr, Arc<AtomicUsize>, JoinHandle<()>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_for_handler = calls.clone();

    let app = Router::new().route(
        "/identity/v1/register/batch",
        post(move |headers: axum::http::HeaderMap, Json(body): Json<Value>| {
            let calls = calls_for_handler.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(
                    headers.get("X-License-Key").and_then(|v| v.to_str().ok()),
                    Some(expected_license_key)
                );
                let entities = body["entities"].as_array().cloned().unwrap_or_default();
                let responses: Vec<Value> = entities
                    .iter()
                    .enumerate()
                    .map(|(i, e)| {
                        json!({
                            "id": i as u64 + 1,
                            "key": e["name"],
                            "name": e["name"],
                            "err": Value::Null,
                        })
                    })
                    .collect();
                Json(responses)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, calls, handle)
}

fn entity(name: &str) -> EntityRegisterRequest {
    EntityRegisterRequest {
        name: name.to_string(),
        entity_type: "host".to_string(),
        display_name: None,
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn register_batch_posts_license_header_and_parses_response() {
    let (addr, calls, _handle) = start_mock_collector("test-license-key").await;
    let client = HttpRegisterClient::new(format!("http://{addr}"), "test-license-key");

    let entities = vec![entity("host-1"), entity("host-2")];
    let responses = client.register_batch(7, &entities).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, 1);
    assert_eq!(responses[0].key, "host-1");
    assert_eq!(responses[1].id, 2);
    assert_eq!(responses[1].key, "host-2");
}

#[tokio::test]
async fn register_batch_surfaces_non_success_status_as_transport_error() {
    let app = Router::new().route(
        "/identity/v1/register/batch",
        post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = HttpRegisterClient::new(format!("http://{addr}"), "key");
    let err = client.register_batch(1, &[entity("host-1")]).await.unwrap_err();
    assert!(matches!(err, infra_agent_core::error::AgentError::Transport(_)));
}
