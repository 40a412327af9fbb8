//! HTTP API for incident submission, result polling, history queries,
//! health checks and Prometheus metrics

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use engine_lib::{
    health::{ComponentStatus, HealthRegistry},
    history::HistoryStore,
    ingest::{self, RawEvent},
    models::{reason, HistoryRecord, WorkloadRef},
    policy::PolicySet,
    EngineMetrics, IncidentStatus, RemediationPipeline,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RemediationPipeline>,
    pub history: Arc<HistoryStore>,
    pub policies: Arc<PolicySet>,
    pub health_registry: HealthRegistry,
    pub metrics: EngineMetrics,
}

/// Error body with a machine-readable code
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Response for asynchronous submissions
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub incident_id: String,
}

/// Response for still-running incidents
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub status: String,
    pub incident_id: String,
}

/// History query response
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub workload: WorkloadRef,
    pub records: Vec<HistoryRecord>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    /// "async" detaches processing and returns 202 with the incident id
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

/// Submit a raw event for remediation
async fn submit_incident(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubmitParams>,
    Json(event): Json<RawEvent>,
) -> Response {
    let source = event.source.clone();

    let incident = match ingest::normalize(event) {
        Ok(incident) => incident,
        Err(e) => {
            state.metrics.inc_incidents_malformed();
            let body = ErrorResponse {
                error: e.to_string(),
                code: reason::MALFORMED_INCIDENT.to_string(),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    info!(
        incident_id = %incident.id,
        workload = %incident.workload,
        source = %source,
        "Incident accepted"
    );

    if params.mode.as_deref() == Some("async") {
        let incident_id = incident.id.clone();
        let task_id = incident_id.clone();
        let pipeline = state.pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.submit(incident).await {
                error!(incident_id = %task_id, error = %e, "Background processing failed");
            }
        });
        return (StatusCode::ACCEPTED, Json(AcceptedResponse { incident_id })).into_response();
    }

    match state.pipeline.submit(incident).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            let body = ErrorResponse {
                error: e.to_string(),
                code: "internal".to_string(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Poll a previously submitted incident by id
async fn get_incident(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.pipeline.status(&id) {
        Some(IncidentStatus::Completed(result)) => {
            (StatusCode::OK, Json(result)).into_response()
        }
        Some(IncidentStatus::Pending) => {
            let body = PendingResponse {
                status: "pending".to_string(),
                incident_id: id,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        None => {
            let body = ErrorResponse {
                error: format!("unknown incident id {}", id),
                code: "not-found".to_string(),
            };
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
    }
}

/// Query the remediation history of a workload
async fn get_history(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let workload = WorkloadRef::new(
        params.kind.unwrap_or_else(|| "Deployment".to_string()),
        namespace,
        name,
    );
    let since = params
        .since
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let records = state.history.query(&workload, since).await;
    let total = records.len();

    Json(HistoryResponse {
        workload,
        records,
        total,
    })
}

/// The loaded policy table (read-only)
async fn get_policies(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.policies.as_ref().clone())
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
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
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/incidents", post(submit_incident))
        .route("/api/v1/incidents/:id", get(get_incident))
        .route("/api/v1/history/:namespace/:name", get(get_history))
        .route("/api/v1/policies", get(get_policies))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
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
