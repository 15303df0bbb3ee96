//! REST API handlers for participant routing and operational endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cohort_core::error::RouterError;
use cohort_core::types::{OutcomeStatus, Properties, RouteOutcome};
use cohort_engine::service::missing_parameters;
use cohort_engine::RouterService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::swagger::ApiDoc;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RouterService>,
    pub node_id: String,
    pub start_time: Instant,
    /// Experiments in the loaded catalog.
    pub experiments: usize,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AssignRequest {
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default, alias = "browser_id")]
    pub participant_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub properties: Option<Properties>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct NextRequest {
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default, alias = "browser_id")]
    pub participant_id: Option<String>,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub properties: Option<Properties>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default, alias = "browser_id")]
    pub participant_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HeartbeatResponse {
    pub status: OutcomeStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub experiments: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// A body that fails to parse is treated as carrying no fields, so the
/// caller gets the usual missing-parameters answer.
fn body_or_default<T: Default>(body: Result<Json<T>, JsonRejection>, endpoint: &str) -> T {
    match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(endpoint, error = %rejection, "Unreadable request body");
            T::default()
        }
    }
}

fn reply(outcome: RouteOutcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome)).into_response()
}

fn rejected(outcome: RouteOutcome, endpoint: &str) -> Response {
    warn!(endpoint, message = ?outcome.message, "Request validation failed");
    metrics::counter!("api.validation_errors").increment(1);
    reply(outcome)
}

fn failure(err: RouterError, endpoint: &str) -> ApiError {
    error!(endpoint, error = %err, "Routing request failed");
    metrics::counter!("api.errors").increment(1);
    match err {
        RouterError::Repository(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "store_unavailable".to_string(),
                message: "Participant store is unavailable".to_string(),
            }),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "routing_failed".to_string(),
                message: "Internal processing error".to_string(),
            }),
        ),
    }
}

/// POST /assign: Place a participant in a group or resume them.
#[utoipa::path(
    post,
    path = "/assign",
    tag = "Routing",
    request_body = AssignRequest,
    responses(
        (status = 200, description = "First or current step, fallback when full, deny redirect when refused", body = RouteOutcome),
        (status = 400, description = "Missing parameters", body = RouteOutcome),
        (status = 403, description = "Experiment is disabled", body = RouteOutcome),
        (status = 404, description = "Experiment ID not found", body = RouteOutcome),
        (status = 503, description = "Participant store unavailable", body = ErrorResponse),
    )
)]
pub async fn handle_assign(
    State(state): State<AppState>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body_or_default(body, "assign");
    if let Some(outcome) = missing_parameters(&[
        ("experiment_id", request.experiment_id.as_deref()),
        ("participant_id", request.participant_id.as_deref()),
    ]) {
        return Ok(rejected(outcome, "assign"));
    }
    let experiment_id = request.experiment_id.unwrap_or_default();
    let participant_id = request.participant_id.unwrap_or_default();

    metrics::counter!("api.assign.requests").increment(1);
    state
        .service
        .assign(
            &experiment_id,
            &participant_id,
            request.properties.unwrap_or_default(),
        )
        .await
        .map(reply)
        .map_err(|e| failure(e, "assign"))
}

/// POST /next: Advance a participant past the page they are on.
#[utoipa::path(
    post,
    path = "/next",
    tag = "Routing",
    request_body = NextRequest,
    responses(
        (status = 200, description = "Next step, or completion", body = RouteOutcome),
        (status = 400, description = "Missing parameters", body = RouteOutcome),
        (status = 404, description = "Participant or matching step not found", body = RouteOutcome),
        (status = 500, description = "Experiment config not found", body = RouteOutcome),
        (status = 503, description = "Participant store unavailable", body = ErrorResponse),
    )
)]
pub async fn handle_next(
    State(state): State<AppState>,
    body: Result<Json<NextRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body_or_default(body, "next");
    if let Some(outcome) = missing_parameters(&[
        ("experiment_id", request.experiment_id.as_deref()),
        ("participant_id", request.participant_id.as_deref()),
        ("current_url", request.current_url.as_deref()),
    ]) {
        return Ok(rejected(outcome, "next"));
    }
    let experiment_id = request.experiment_id.unwrap_or_default();
    let participant_id = request.participant_id.unwrap_or_default();
    let current_url = request.current_url.unwrap_or_default();

    metrics::counter!("api.next.requests").increment(1);
    state
        .service
        .next(
            &experiment_id,
            &participant_id,
            &current_url,
            request.properties.unwrap_or_default(),
        )
        .await
        .map(reply)
        .map_err(|e| failure(e, "next"))
}

/// POST /heartbeat: Keep a participant's seat alive.
#[utoipa::path(
    post,
    path = "/heartbeat",
    tag = "Routing",
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Heartbeat accepted", body = HeartbeatResponse),
        (status = 400, description = "Missing parameters", body = RouteOutcome),
        (status = 503, description = "Participant store unavailable", body = ErrorResponse),
    )
)]
pub async fn handle_heartbeat(
    State(state): State<AppState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = body_or_default(body, "heartbeat");
    if let Some(outcome) = missing_parameters(&[
        ("experiment_id", request.experiment_id.as_deref()),
        ("participant_id", request.participant_id.as_deref()),
    ]) {
        return Ok(rejected(outcome, "heartbeat"));
    }
    let experiment_id = request.experiment_id.unwrap_or_default();
    let participant_id = request.participant_id.unwrap_or_default();

    state
        .service
        .heartbeat(&experiment_id, &participant_id)
        .await
        .map_err(|e| failure(e, "heartbeat"))?;
    Ok(Json(HeartbeatResponse {
        status: OutcomeStatus::Ok,
    })
    .into_response())
}

/// GET /: Banner.
pub async fn root() -> &'static str {
    "Participants Router API is running."
}

/// GET /health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        experiments: state.experiments,
    })
}

/// GET /ready: Readiness probe.
/// Returns 200 only once at least one experiment is loaded.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Ready to route"),
        (status = 503, description = "No experiments loaded"),
    )
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.experiments > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /api-docs/openapi.json
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    use utoipa::OpenApi;
    Json(ApiDoc::openapi())
}
