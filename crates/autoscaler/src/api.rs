//! HTTP API for health checks, Prometheus metrics, and the engine surfaces

use autoscaler_lib::engine::Engine;
use autoscaler_lib::health::ComponentStatus;
use autoscaler_lib::models::{InterruptionNotice, NodePool, Utilization, WorkloadDemand};
use autoscaler_lib::PolicyError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub demand_tx: mpsc::Sender<WorkloadDemand>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, demand_tx: mpsc::Sender<WorkloadDemand>) -> Self {
        Self { engine, demand_tx }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.engine.health_registry().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.engine.health_registry().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Most recent cycle report
async fn report(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.last_report().await {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no completed cycle yet" })),
        )
            .into_response(),
    }
}

async fn list_pools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.pools().await)
}

async fn create_pool(
    State(state): State<Arc<AppState>>,
    Json(pool): Json<NodePool>,
) -> Response {
    let name = pool.name.clone();
    match state.engine.register_pool(pool).await {
        Ok(()) => {
            info!(pool = %name, "Pool registered via API");
            StatusCode::CREATED.into_response()
        }
        Err(e) => policy_error_response(e),
    }
}

async fn remove_pool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.engine.remove_pool(&name).await {
        Ok(()) => {
            info!(pool = %name, "Pool removed via API");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => policy_error_response(e),
    }
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.nodes().await)
}

async fn record_utilization(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(utilization): Json<Utilization>,
) -> impl IntoResponse {
    state.engine.record_utilization(&node_id, utilization).await;
    StatusCode::ACCEPTED
}

async fn submit_demand(
    State(state): State<Arc<AppState>>,
    Json(demand): Json<WorkloadDemand>,
) -> Response {
    match state.demand_tx.send(demand).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "demand feed closed" })),
        )
            .into_response(),
    }
}

async fn report_interruption(
    State(state): State<Arc<AppState>>,
    Json(notice): Json<InterruptionNotice>,
) -> impl IntoResponse {
    state.engine.report_interruption(notice).await;
    StatusCode::ACCEPTED
}

async fn list_launches(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pending: Vec<serde_json::Value> = state
        .engine
        .pending_launches()
        .into_iter()
        .map(|(id, launch)| json!({ "launch_id": id, "launch": launch }))
        .collect();
    Json(pending)
}

async fn confirm_launch(
    State(state): State<Arc<AppState>>,
    Path(launch_id): Path<String>,
) -> Response {
    let now = chrono::Utc::now().timestamp();
    match state.engine.confirm_launch(&launch_id, now).await {
        Some(node_ids) => (StatusCode::OK, Json(json!({ "nodes": node_ids }))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown launch id" })),
        )
            .into_response(),
    }
}

fn policy_error_response(error: PolicyError) -> Response {
    let status = match &error {
        PolicyError::DuplicateName(_) | PolicyError::PoolInUse(_) => StatusCode::CONFLICT,
        PolicyError::UnknownPool(_) => StatusCode::NOT_FOUND,
        PolicyError::UnknownArchitecture(_) | PolicyError::NoEligibleShape { .. } => {
            StatusCode::BAD_REQUEST
        }
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/report", get(report))
        .route("/api/v1/pools", get(list_pools).post(create_pool))
        .route("/api/v1/pools/:name", delete(remove_pool))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/:id/utilization", post(record_utilization))
        .route("/api/v1/demands", post(submit_demand))
        .route("/api/v1/interruptions", post(report_interruption))
        .route("/api/v1/launches", get(list_launches))
        .route("/api/v1/launches/:id/confirm", post(confirm_launch))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
