//! OpenAPI document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cohort Router API",
        version = "0.1.0",
        description = "Assigns participants to capacity-limited experiment groups and walks them through each group's ordered steps.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Routing", description = "Assignment, step progression and heartbeats"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Routing
        crate::rest::handle_assign,
        crate::rest::handle_next,
        crate::rest::handle_heartbeat,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        cohort_core::types::RouteOutcome,
        cohort_core::types::OutcomeStatus,
        crate::rest::AssignRequest,
        crate::rest::NextRequest,
        crate::rest::HeartbeatRequest,
        crate::rest::HeartbeatResponse,
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
    ))
)]
pub struct ApiDoc;
