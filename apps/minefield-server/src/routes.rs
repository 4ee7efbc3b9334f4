use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::debug;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::events::InboundEvent;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    dispatcher: Dispatcher,
    registry: SessionRegistry,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        registry: SessionRegistry,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            start: Instant::now(),
            dispatcher,
            registry,
            metrics,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

#[derive(Serialize)]
struct StatsResponse {
    sessions: usize,
    open_sessions: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct AcceptedResponse {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        sessions: state.registry.count(),
        open_sessions: state.registry.iter_open().count(),
        uptime_secs: state.uptime_secs(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics disabled".to_string(),
        ),
    }
}

async fn updates(
    State(state): State<AppState>,
    Json(event): Json<InboundEvent>,
) -> (StatusCode, Json<AcceptedResponse>) {
    debug!(kind = event.kind(), "inbound event");
    match state.dispatcher.submit(event) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(AcceptedResponse {
                accepted: true,
                reason: None,
            }),
        ),
        Err(err @ (DispatchError::QueueFull | DispatchError::Closed)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(AcceptedResponse {
                accepted: false,
                reason: Some(err.to_string()),
            }),
        ),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/debug/stats", get(stats))
        .route("/metrics", get(metrics_handler))
        .route("/updates", post(updates))
        .with_state(state)
}
