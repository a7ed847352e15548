//! HTTP API for health checks, Prometheus metrics and controller status

use controller_lib::{
    anomaly::ResolverPhase,
    health::{ComponentStatus, HealthRegistry},
    models::HostStatus,
    monitoring::{try_publish, MonitoringEvent},
    observability::ControllerMetrics,
    ControllerState, StateMachine, SubmissionRequest,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ControllerMetrics,
    pub state_machine: StateMachine,
    pub monitoring_tx: mpsc::Sender<MonitoringEvent>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ControllerMetrics,
        state_machine: StateMachine,
        monitoring_tx: mpsc::Sender<MonitoringEvent>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            state_machine,
            monitoring_tx,
        }
    }
}

/// Snapshot served on `/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub busy: bool,
    pub state: ControllerState,
    pub resolver_phase: ResolverPhase,
    pub hosts: HostCounts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostCounts {
    pub active: usize,
    pub woken_up: usize,
    pub passive: usize,
    pub virtual_machines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionAccepted {
    pub task_id: String,
}

/// 200 unless some component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
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
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let state_machine = &state.state_machine;
    let hosts = match state_machine
        .repository()
        .get_host_descriptions(0, false, false)
        .await
    {
        Ok(hosts) => hosts,
        Err(e) => {
            warn!(error = %e, "Failed to read hosts for status");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut counts = HostCounts::default();
    for host in &hosts {
        match host.status {
            HostStatus::Active => counts.active += 1,
            HostStatus::WokenUp => counts.woken_up += 1,
            HostStatus::Passive => counts.passive += 1,
        }
        counts.virtual_machines += host.virtual_machines.len();
    }

    Json(StatusResponse {
        busy: state_machine.is_busy(),
        state: state_machine.state(),
        resolver_phase: state_machine.resolver_phase(),
        hosts: counts,
    })
    .into_response()
}

/// Accept a monitoring sample from a local controller
async fn monitoring(
    State(state): State<Arc<AppState>>,
    Json(event): Json<MonitoringEvent>,
) -> StatusCode {
    if try_publish(&state.monitoring_tx, event) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmissionRequest>,
) -> impl IntoResponse {
    match state.state_machine.start_virtual_machines(request) {
        Ok(task_id) => (StatusCode::ACCEPTED, Json(SubmissionAccepted { task_id })).into_response(),
        Err(e) if e.is_busy() => StatusCode::CONFLICT.into_response(),
        Err(e) => {
            warn!(error = %e, "Submission rejected");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn submission_response(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match state.state_machine.get_submission_response(&task_id) {
        Some(response) => Json(response).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/monitoring", post(monitoring))
        .route("/submissions", post(submit))
        .route("/submissions/:task_id", get(submission_response))
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
