//! Integration tests for the operator API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use operator_lib::{
    catalog::ResourceCatalog,
    health::{components, HealthRegistry},
    platform::InMemoryPlatform,
    reconciler::{OperatorHandle, ReconcileLoop, ReconcileLoopBuilder, Reconciler, ReconcilerConfig},
    relation::RelationBroker,
    storage::{LocalStorage, StorageManager},
    ContainerName, OperatorMetrics, Phase,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tower::ServiceExt;
use upf_operator::api::{create_router, AppState, StatusResponse};

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    reconcile_loop: Option<ReconcileLoop>,
    _root: TempDir,
}

fn setup_test_app() -> TestApp {
    setup_test_app_with(Arc::new(InMemoryPlatform::new()))
}

fn setup_test_app_with(platform: Arc<InMemoryPlatform>) -> TestApp {
    let root = TempDir::new().unwrap();
    let storage = StorageManager::new(Arc::new(LocalStorage::new(root.path(), 1 << 30)));
    let reconciler = Reconciler::new(
        ReconcilerConfig {
            namespace: "core".to_string(),
            ..Default::default()
        },
        ResourceCatalog::with_upstream_sources().unwrap(),
        storage,
        platform,
    );

    let health_registry = HealthRegistry::new();
    let broker = Arc::new(RelationBroker::new());
    let (reconcile_loop, handle) = ReconcileLoopBuilder::new()
        .reconciler(reconciler)
        .broker(broker.clone())
        .health(health_registry.clone())
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(health_registry, handle, broker));
    TestApp {
        router: create_router(state.clone()),
        state,
        reconcile_loop: Some(reconcile_loop),
        _root: root,
    }
}

fn start(app: &mut TestApp) -> broadcast::Sender<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconcile_loop = app.reconcile_loop.take().unwrap();
    tokio::spawn(reconcile_loop.run(shutdown_rx));
    shutdown_tx
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn post_event(router: &Router, json: &str) -> StatusCode {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

async fn wait_active(handle: &OperatorHandle) {
    handle
        .wait_for(Duration::from_secs(5), |u| u.phase() == Phase::Active)
        .await
        .expect("workload never became active");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app();
    app.state
        .health_registry
        .register(components::RECONCILER)
        .await;

    let (status, body) = get(&app.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_unavailable_when_unhealthy() {
    let app = setup_test_app();
    app.state
        .health_registry
        .set_unhealthy(components::RECONCILER, "reconciliation loop stopped")
        .await;

    let (status, body) = get(&app.router, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(
        health["components"]["reconciler"]["message"],
        "reconciliation loop stopped"
    );
}

#[tokio::test]
async fn test_healthz_stays_up_when_workload_errors() {
    let platform = Arc::new(InMemoryPlatform::new());
    platform.reject(ContainerName::Web, 10).await;
    let mut app = setup_test_app_with(platform);
    let _shutdown = start(&mut app);

    assert_eq!(
        post_event(&app.router, r#"{"kind": "install"}"#).await,
        StatusCode::ACCEPTED
    );
    app.state
        .handle
        .wait_for(Duration::from_secs(5), |u| u.phase() == Phase::Error)
        .await
        .expect("workload never reached error");

    let (status, body) = get(&app.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["reconciler"]["status"], "degraded");

    let (_, body) = get(&app.router, "/status").await;
    let response: StatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.status.phase, Phase::Error);
}

#[tokio::test]
async fn test_readyz_follows_registry() {
    let app = setup_test_app();

    let (status, _) = get(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    app.state.health_registry.set_ready(true).await;
    let (status, body) = get(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_operator_metrics() {
    let app = setup_test_app();
    OperatorMetrics::new().set_containers_ready(0);

    let (status, body) = get(&app.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("upf_operator_containers_ready"));
}

#[tokio::test]
async fn test_status_before_install_is_waiting() {
    let app = setup_test_app();

    let (status, body) = get(&app.router, "/status").await;
    assert_eq!(status, StatusCode::OK);

    let response: StatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.status.phase, Phase::Waiting);
    assert!(!response.installed);
    assert!(response.ready.is_empty());
}

#[tokio::test]
async fn test_install_event_drives_workload_active() {
    let mut app = setup_test_app();
    let _shutdown = start(&mut app);

    assert_eq!(
        post_event(&app.router, r#"{"kind": "install"}"#).await,
        StatusCode::ACCEPTED
    );
    wait_active(&app.state.handle).await;

    let (_, body) = get(&app.router, "/status").await;
    let response: StatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.status.phase, Phase::Active);
    assert!(response.installed);
    assert_eq!(response.ready.len(), 5);
    assert_eq!(response.mounts.len(), 2);
}

#[tokio::test]
async fn test_relations_show_published_data() {
    let mut app = setup_test_app();
    let _shutdown = start(&mut app);

    let joined = r#"{"kind": "relation-joined", "interface": "upf", "relation_id": 7, "remote": "smf/0"}"#;
    assert_eq!(post_event(&app.router, joined).await, StatusCode::ACCEPTED);
    assert_eq!(
        post_event(&app.router, r#"{"kind": "install"}"#).await,
        StatusCode::ACCEPTED
    );
    wait_active(&app.state.handle).await;

    let (status, body) = get(&app.router, "/relations").await;
    assert_eq!(status, StatusCode::OK);

    let records: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(records[0]["relation_id"], 7);
    assert_eq!(records[0]["subscribers"][0], "smf/0");
    assert_eq!(
        records[0]["published"]["url"],
        "upf.core.svc.cluster.local"
    );
}

#[tokio::test]
async fn test_malformed_event_is_rejected() {
    let app = setup_test_app();

    let status = post_event(&app.router, r#"{"kind": "reboot"}"#).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_event_after_loop_stopped_is_unavailable() {
    let mut app = setup_test_app();
    drop(app.reconcile_loop.take());

    let status = post_event(&app.router, r#"{"kind": "install"}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
