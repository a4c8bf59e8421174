//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/readyz`  : readiness (503 until the subscriber consumes, and while stopping)
//! - `/metrics` : Prometheus text format

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::subscriber::RabbitSubscriber;

#[derive(Clone)]
pub struct OpsState {
    subscriber: Arc<RabbitSubscriber>,
}

impl OpsState {
    pub fn new(subscriber: Arc<RabbitSubscriber>) -> Self {
        Self { subscriber }
    }
}

pub fn build_router(state: OpsState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(state): State<OpsState>) -> impl IntoResponse {
    if state.subscriber.is_running() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not consuming")
    }
}

pub async fn metrics(State(state): State<OpsState>) -> Response {
    let body = state.subscriber.metrics().render();

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
