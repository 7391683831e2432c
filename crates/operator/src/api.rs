//! HTTP API for health checks, Prometheus metrics, workload status and events

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use operator_lib::{
    health::{ComponentStatus, HealthRegistry},
    reconciler::{OperatorEvent, OperatorHandle},
    relation::{RelationBroker, RelationRecord},
    ContainerName, MountHandle, ReconciliationStatus, VolumeName,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub handle: OperatorHandle,
    pub broker: Arc<RelationBroker>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        handle: OperatorHandle,
        broker: Arc<RelationBroker>,
    ) -> Self {
        Self {
            health_registry,
            handle,
            broker,
        }
    }
}

/// Workload status as of the last completed pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ReconciliationStatus,
    pub installed: bool,
    pub removed: bool,
    pub ready: Vec<ContainerName>,
    pub mounts: BTreeMap<VolumeName, MountHandle>,
    pub passes: u64,
    pub observed_at: i64,
}

/// Error body for rejected requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Liveness - 200 while healthy or degraded, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

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
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let unit = state.handle.unit();
    Json(StatusResponse {
        status: unit.status,
        installed: unit.installed,
        removed: unit.removed,
        ready: unit.ready.into_iter().collect(),
        mounts: unit.mounts,
        passes: unit.passes,
        observed_at: chrono::Utc::now().timestamp(),
    })
}

async fn relations(State(state): State<Arc<AppState>>) -> Json<Vec<RelationRecord>> {
    Json(state.broker.snapshot())
}

/// Queue a lifecycle event for the reconciliation loop
async fn events(
    State(state): State<Arc<AppState>>,
    Json(event): Json<OperatorEvent>,
) -> impl IntoResponse {
    let kind = event.kind();
    match state.handle.send(event).await {
        Ok(()) => {
            info!(kind, "Event accepted");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/relations", get(relations))
        .route("/events", post(events))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
