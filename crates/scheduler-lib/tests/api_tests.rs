//! Integration tests for the health and metrics endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use scheduler_lib::{
    api::{self, create_router, AppState},
    health::{components, HealthRegistry},
    observability::SchedulerMetrics,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;

async fn setup_test_app(failure_threshold: u32) -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::with_threshold(failure_threshold);
    health_registry.register(components::TELEMETRY).await;
    health_registry.register(components::WATCH).await;
    health_registry.register(components::SWEEP).await;

    let metrics = SchedulerMetrics::new().unwrap();
    let state = Arc::new(AppState::new(health_registry, metrics));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app(3).await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["telemetry"]["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app(3).await;
    state
        .health_registry
        .record_failure(components::TELEMETRY, "prometheus timed out")
        .await;

    let (status, body) = get(app, "/healthz").await;
    // Degraded still returns 200
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["telemetry"]["message"],
        "prometheus timed out"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app(1).await;
    state
        .health_registry
        .record_failure(components::SWEEP, "api server unreachable")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_startup_completes() {
    let (app, _state) = setup_test_app(3).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app(3).await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_fails_with_unhealthy_duty() {
    let (app, state) = setup_test_app(1).await;
    state.health_registry.set_ready(true).await;
    state
        .health_registry
        .record_failure(components::WATCH, "watch closed")
        .await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(readiness["reason"].as_str().unwrap().contains("watch"));
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_scheduler_metrics() {
    let (app, state) = setup_test_app(3).await;
    state.metrics.inc_placements();
    state.metrics.set_pending_binds(2);

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("kubepower_placements_total 1"));
    assert!(text.contains("kubepower_pending_binds 2"));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _state) = setup_test_app(3).await;

    let (status, _) = get(app, "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_serve_fails_fast_when_port_is_taken() {
    let (_app, state) = setup_test_app(3).await;
    let taken = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        api::serve(port, state, shutdown_rx),
    )
    .await
    .expect("serve should return instead of waiting for shutdown");

    assert!(result.is_err());
}
