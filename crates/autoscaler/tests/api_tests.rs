//! Integration tests for the daemon API endpoints

use anyhow::Result;
use async_trait::async_trait;
use autoscaler_lib::catalog::InstanceCatalog;
use autoscaler_lib::engine::{Engine, EngineConfig, InstanceLauncher, WorkloadEvictor};
use autoscaler_lib::health::ComponentStatus;
use autoscaler_lib::models::{
    Architecture, CapacityTypeConstraint, InterruptionNotice, Node, NodePool, ProvisioningPlan,
    ResourceVector, WorkloadDemand,
};
use autoscaler_lib::pools::NodePoolRegistry;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

struct NoopProvider;

#[async_trait]
impl InstanceLauncher for NoopProvider {
    async fn launch(&self, _launch_id: &str, _plan: &ProvisioningPlan) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl WorkloadEvictor for NoopProvider {
    async fn drain(&self, _node: &Node, _deadline: i64) -> Result<()> {
        Ok(())
    }

    async fn terminate(&self, _node: &Node) -> Result<()> {
        Ok(())
    }
}

async fn healthz(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let health = engine.health_registry().health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let readiness = engine.health_registry().readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn report(State(engine): State<Arc<Engine>>) -> Response {
    match engine.last_report().await {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no completed cycle yet" })),
        )
            .into_response(),
    }
}

async fn list_pools(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.pools().await)
}

async fn create_pool(
    State(engine): State<Arc<Engine>>,
    Json(pool): Json<NodePool>,
) -> Response {
    match engine.register_pool(pool).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn list_nodes(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(engine.nodes().await)
}

async fn submit_demand(
    State(engine): State<Arc<Engine>>,
    Json(demand): Json<WorkloadDemand>,
) -> impl IntoResponse {
    engine.submit_demand(demand).await;
    StatusCode::ACCEPTED
}

async fn report_interruption(
    State(engine): State<Arc<Engine>>,
    Json(notice): Json<InterruptionNotice>,
) -> impl IntoResponse {
    engine.report_interruption(notice).await;
    StatusCode::ACCEPTED
}

async fn confirm_launch(
    State(engine): State<Arc<Engine>>,
    Path(launch_id): Path<String>,
) -> Response {
    match engine.confirm_launch(&launch_id, 0).await {
        Some(ids) => (StatusCode::OK, Json(json!({ "nodes": ids }))).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v1/report", get(report))
        .route("/api/v1/pools", get(list_pools).post(create_pool))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/demands", post(submit_demand))
        .route("/api/v1/interruptions", post(report_interruption))
        .route("/api/v1/launches/:id/confirm", post(confirm_launch))
        .with_state(engine)
}

fn pool_body(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "architecture": "amd64",
        "capacity_type": "on-demand",
        "resource_limits": { "cpu_millis": 1_000_000u64, "memory_bytes": u64::MAX },
    })
}

fn engine() -> Arc<Engine> {
    let mut registry = NodePoolRegistry::new();
    registry
        .register(NodePool {
            name: "x86".to_string(),
            architecture: Some(Architecture::Amd64),
            capacity_type: CapacityTypeConstraint::OnDemand,
            allowed_families: Default::default(),
            taint: None,
            resource_limits: ResourceVector::new(1_000_000, u64::MAX),
            disruption: Default::default(),
            on_demand_floor: 0,
        })
        .unwrap();
    let provider = Arc::new(NoopProvider);
    Arc::new(Engine::new(
        registry,
        InstanceCatalog::builtin(),
        provider.clone(),
        provider,
        EngineConfig::default(),
    ))
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> StatusCode {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

#[tokio::test]
async fn test_healthz_returns_ok() {
    let app = router(engine());
    let (status, health) = get_json(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_readyz_not_ready_before_engine_starts() {
    let app = router(engine());
    let (status, readiness) = get_json(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_report_absent_before_first_cycle() {
    let engine = engine();
    let app = router(engine.clone());
    let (status, _) = get_json(&app, "/api/v1/report").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    engine.run_cycle(0).await;
    let (status, report) = get_json(&app, "/api/v1/report").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["cycle"], 1);
}

#[tokio::test]
async fn test_pool_listing_and_conflict() {
    let app = router(engine());
    let (status, pools) = get_json(&app, "/api/v1/pools").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pools.as_array().unwrap().len(), 1);

    assert_eq!(
        post_json(&app, "/api/v1/pools", pool_body("graviton")).await,
        StatusCode::CREATED
    );
    // Duplicate name is rejected
    assert_eq!(
        post_json(&app, "/api/v1/pools", pool_body("x86")).await,
        StatusCode::CONFLICT
    );

    let (_, pools) = get_json(&app, "/api/v1/pools").await;
    assert_eq!(pools.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_demand_to_plan_to_nodes_flow() {
    let engine = engine();
    let app = router(engine.clone());

    let demand = json!({
        "id": "d1",
        "requested": { "cpu_millis": 4000u64, "memory_bytes": 16u64 * 1024 * 1024 * 1024 },
        "architecture": "amd64",
        "created_at": 0,
    });
    assert_eq!(
        post_json(&app, "/api/v1/demands", demand).await,
        StatusCode::ACCEPTED
    );

    let report = engine.run_cycle(0).await;
    assert_eq!(report.matched, 1);
    assert_eq!(report.plans_emitted, 1);

    let (launch_id, _) = engine.pending_launches().into_iter().next().unwrap();
    let status = post_json(
        &app,
        &format!("/api/v1/launches/{}/confirm", launch_id),
        serde_json::Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, nodes) = get_json(&app, "/api/v1/nodes").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!nodes.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_launch_confirmation_404() {
    let app = router(engine());
    let status = post_json(
        &app,
        "/api/v1/launches/launch-999/confirm",
        serde_json::Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_interruption_accepted_and_applied() {
    let engine = engine();
    let app = router(engine.clone());

    let notice = json!({ "node_id": "n-missing", "deadline": 100 });
    assert_eq!(
        post_json(&app, "/api/v1/interruptions", notice).await,
        StatusCode::ACCEPTED
    );

    // Unknown node: the notice is consumed without effect
    let report = engine.run_cycle(0).await;
    assert_eq!(report.nodes_terminated, 0);
}
