//! HTTP API dashboard server

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::modules::poll_loop::{LoopState, PollLoop};
use crate::modules::rolling_stats::StatsSnapshot;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    uptime: f64,
    running: bool,
    loop_state: LoopState,
}

/// Stats response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    window: StatsSnapshot,
    subscribers: usize,
    checkpoint: Option<u64>,
    threshold_usd: Decimal,
    ticks_skipped: u64,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub poll: PollLoop,
}

/// Dashboard server
pub struct DashboardServer {
    port: u16,
    state: AppState,
}

impl DashboardServer {
    pub fn new(port: u16, poll: PollLoop) -> Self {
        Self {
            port,
            state: AppState { poll },
        }
    }

    /// Start the dashboard server
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(target: "DASHBOARD", "✅ Dashboard running at http://localhost:{}", self.port);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================
// HANDLERS
// ============================================

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let poll = &state.poll;
    let window = poll.stats().read().snapshot(Utc::now());

    Json(StatsResponse {
        window,
        subscribers: poll.registry().len(),
        checkpoint: poll.checkpoint(),
        threshold_usd: poll.threshold_usd(),
        ticks_skipped: poll.ticks_skipped(),
    })
}

async fn get_metrics(State(state): State<AppState>) -> Response {
    let metrics = state.poll.metrics();
    metrics.subscribers.set(state.poll.registry().len() as i64);

    match metrics.render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(target: "DASHBOARD", "Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime: state.poll.metrics().uptime_secs(),
        running: state.poll.is_running(),
        loop_state: state.poll.state(),
    })
}

/// Ready once a checkpoint exists (bootstrapped or restored)
async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.poll.checkpoint() {
        Some(height) => {
            Json(serde_json::json!({"ready": true, "checkpoint": height})).into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ready": false})),
        )
            .into_response(),
    }
}
