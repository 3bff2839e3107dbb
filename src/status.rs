//! Ambient observability surface: `/healthz` + `/metrics` Prometheus
//! exposition, reused from the teacher's `AppState` atomic-counter-bag
//! idiom (`lib.rs` `healthz_handler`/`metrics_handler`) rather than
//! hand-rolling a fresh status layer. Not part of the distilled spec —
//! carried as ambient infrastructure per the expanded spec.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct StatusState {
    pub started_at: Instant,
    pub version: Arc<str>,
    pub datasets_emitted_total: Arc<AtomicU64>,
    pub datasets_failed_total: Arc<AtomicU64>,
    pub deltas_stored_total: Arc<AtomicU64>,
    pub cloud_type: Arc<std::sync::RwLock<&'static str>>,
}

impl StatusState {
    pub fn new(version: impl Into<Arc<str>>) -> Self {
        Self {
            started_at: Instant::now(),
            version: version.into(),
            datasets_emitted_total: Arc::new(AtomicU64::new(0)),
            datasets_failed_total: Arc::new(AtomicU64::new(0)),
            deltas_stored_total: Arc::new(AtomicU64::new(0)),
            cloud_type: Arc::new(std::sync::RwLock::new("in_progress")),
        }
    }
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn healthz_handler(State(state): State<StatusState>) -> axum::response::Response {
    let body = serde_json::json!({
        "status": "ok",
        "version": &*state.version,
        "uptimeSecs": state.started_at.elapsed().as_secs_f64(),
        "cloudType": *state.cloud_type.read().unwrap(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn metrics_handler(State(state): State<StatusState>) -> axum::response::Response {
    let mut buf = String::new();
    let emitted = state.datasets_emitted_total.load(Ordering::Relaxed);
    let failed = state.datasets_failed_total.load(Ordering::Relaxed);
    let deltas = state.deltas_stored_total.load(Ordering::Relaxed);

    writeln!(&mut buf, "# HELP infra_agent_datasets_emitted_total Datasets successfully emitted").ok();
    writeln!(&mut buf, "# TYPE infra_agent_datasets_emitted_total counter").ok();
    writeln!(&mut buf, "infra_agent_datasets_emitted_total {emitted}").ok();

    writeln!(&mut buf, "# HELP infra_agent_datasets_failed_total Datasets dropped during emission").ok();
    writeln!(&mut buf, "# TYPE infra_agent_datasets_failed_total counter").ok();
    writeln!(&mut buf, "infra_agent_datasets_failed_total {failed}").ok();

    writeln!(&mut buf, "# HELP infra_agent_deltas_stored_total Inventory deltas persisted").ok();
    writeln!(&mut buf, "# TYPE infra_agent_deltas_stored_total counter").ok();
    writeln!(&mut buf, "infra_agent_deltas_stored_total {deltas}").ok();

    writeln!(&mut buf, "# HELP infra_agent_build_info Build information\n# TYPE infra_agent_build_info gauge").ok();
    writeln!(&mut buf, "infra_agent_build_info{{version=\"{}\"}} 1", state.version).ok();

    (StatusCode::OK, buf).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = router(StatusState::new("0.1.0"));
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exposes_counters() {
        let state = StatusState::new("0.1.0");
        state.datasets_emitted_total.store(3, Ordering::Relaxed);
        let app = router(state);
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("infra_agent_datasets_emitted_total 3"));
    }
}
