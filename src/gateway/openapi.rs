//! OpenAPI Documentation
//!
//! OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::handlers::HealthResponse;
use crate::routing::api::{CreateRouteRequest, CreateRouteResponse, RouteStatusView};
use crate::routing::{StepOutcome, StepRouteRequest};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Hop Router API",
        version = "1.0.0",
        description = "Multi-hop transfer routing through short-lived burner wallets.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health_check,
        crate::gateway::handlers::create_route,
        crate::gateway::handlers::step_route,
        crate::gateway::handlers::get_route,
    ),
    components(
        schemas(
            HealthResponse,
            CreateRouteRequest,
            CreateRouteResponse,
            StepRouteRequest,
            StepOutcome,
            RouteStatusView,
        )
    ),
    tags(
        (name = "Routing", description = "Create, advance and inspect routes"),
        (name = "System", description = "Health checks and system info")
    )
)]
pub struct ApiDoc;
