//! Integration tests for the governor API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use governor_lib::{FixedProbe, GovernorConfig, ResourceManager};
use pipeline_governor::api::{create_router, AppState};
use std::sync::Arc;
use tower::ServiceExt;

fn setup_test_app() -> (Router, Arc<ResourceManager>, Arc<FixedProbe>) {
    let probe = Arc::new(FixedProbe::new(8, 4));
    probe.set_rss_mb(400.0);
    probe.set_cpu_percent(15.0);

    let config = GovernorConfig {
        sampling_interval_secs: 0.01,
        ..Default::default()
    };
    let manager = Arc::new(
        ResourceManager::builder()
            .config(config)
            .probe(probe.clone())
            .build()
            .unwrap(),
    );
    let router = create_router(Arc::new(AppState::new(manager.clone())));

    (router, manager, probe)
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
    let (app, _manager, _probe) = setup_test_app();

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["memory_monitor"]["pressure"], "none");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, _manager, probe) = setup_test_app();
    probe.set_rss_mb(3200.0);

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_critical() {
    let (app, _manager, probe) = setup_test_app();
    probe.set_cpu_percent(99.0);

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["components"]["cpu_monitor"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_sampling_lifecycle() {
    let (app, manager, _probe) = setup_test_app();

    let (status, _) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    manager.start().unwrap();
    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);

    manager.stop().await;
    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_status_endpoint() {
    let (app, _manager, _probe) = setup_test_app();

    let (status, body) = get(app, "/status").await;
    assert_eq!(status, StatusCode::OK);

    let snapshot: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(snapshot["running"], false);
    assert_eq!(snapshot["pressure"]["memory_pressure"], "none");
    assert_eq!(snapshot["estimated_threads"], 8);
    assert_eq!(snapshot["max_threads"], 8);
    assert_eq!(snapshot["memory_trend"]["status"], "insufficient_data");
    assert!(snapshot.get("best_measured_threads").is_none());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, manager, _probe) = setup_test_app();
    manager.memory_monitor().sample();

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("governor_memory_rss_megabytes"));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _manager, _probe) = setup_test_app();

    let (status, _) = get(app, "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
