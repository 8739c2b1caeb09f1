//! HTTP handlers for the routing API
//!
//! Thin adapters: parse the request, call the matching `routing::api`
//! operation, wrap the result in the `ApiResponse` envelope.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::{Json, http::StatusCode};
use utoipa::ToSchema;

use super::state::AppState;
use super::types::{ApiError, ApiResponse, ApiResult, error_codes, ok};
use crate::routing::api::{self, CreateRouteRequest, CreateRouteResponse, RouteStatusView};
use crate::routing::{StepOutcome, StepRouteRequest};

// ============================================================================
// Health
// ============================================================================

/// Health check response data
#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_u64)]
    pub timestamp_ms: u64,
}

/// Health check endpoint
///
/// Pings PostgreSQL when that backend is configured, at most once per
/// interval. Internal details are never exposed in the response.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    static LAST_CHECK_MS: AtomicU64 = AtomicU64::new(0);
    const CHECK_INTERVAL_MS: u64 = 5000;

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let last_check = LAST_CHECK_MS.load(Ordering::Relaxed);
    let healthy = match &state.pg_store {
        Some(pg) if now_ms.saturating_sub(last_check) > CHECK_INTERVAL_MS => {
            LAST_CHECK_MS.store(now_ms, Ordering::Relaxed);
            match pg.health_check().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("[HEALTH] PostgreSQL ping failed: {}", e);
                    false
                }
            }
        }
        _ => true,
    };

    if healthy {
        (
            StatusCode::OK,
            Json(ApiResponse::success(HealthResponse {
                timestamp_ms: now_ms,
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                code: error_codes::SERVICE_UNAVAILABLE,
                msg: "unavailable".to_string(),
                data: None,
            }),
        )
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Create a routing plan
///
/// Validates the request, computes the fee, creates the hop wallets and
/// persists the plan. The client funds `first_hop_address` afterwards.
#[utoipa::path(
    post,
    path = "/api/v1/routes",
    request_body = CreateRouteRequest,
    responses(
        (status = 200, description = "Plan created", body = CreateRouteResponse),
        (status = 400, description = "Invalid request"),
        (status = 502, description = "Signer unavailable")
    ),
    tag = "Routing"
)]
pub async fn create_route(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRouteRequest>,
) -> ApiResult<CreateRouteResponse> {
    tracing::info!(
        "[ROUTE] create request from={} to={} amount={}",
        req.from_wallet,
        req.to_wallet,
        req.amount
    );
    match api::create_route(&state.builder, req).await {
        Ok(resp) => ok(resp),
        Err(e) => {
            tracing::warn!("[ROUTE] create rejected: {}", e);
            ApiError::from(e).into_err()
        }
    }
}

/// Advance a plan by at most one unit of work
///
/// The body is optional; `funding_signature` is recorded when funding is
/// detected on this call.
#[utoipa::path(
    post,
    path = "/api/v1/routes/{id}/step",
    params(("id" = String, Path, description = "Route ID (ULID)")),
    request_body(content = StepRouteRequest, description = "Optional step hints"),
    responses(
        (status = 200, description = "Step result", body = StepOutcome),
        (status = 400, description = "Invalid route ID or body"),
        (status = 404, description = "Route not found"),
        (status = 409, description = "Concurrent update")
    ),
    tag = "Routing"
)]
pub async fn step_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<StepOutcome> {
    let req = match parse_step_body(&body) {
        Ok(req) => req,
        Err(e) => return e.into_err(),
    };

    match api::step_route(&state.executor, &id, req).await {
        Ok(outcome) => ok(outcome),
        Err(e) => ApiError::from(e).into_err(),
    }
}

/// An empty or whitespace-only body means "no hints"
fn parse_step_body(body: &[u8]) -> Result<StepRouteRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StepRouteRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid body: {}", e)))
}

/// Read-only projection of a plan and its progress
#[utoipa::path(
    get,
    path = "/api/v1/routes/{id}",
    params(("id" = String, Path, description = "Route ID (ULID)")),
    responses(
        (status = 200, description = "Route status", body = RouteStatusView),
        (status = 400, description = "Invalid route ID"),
        (status = 404, description = "Route not found")
    ),
    tag = "Routing"
)]
pub async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<RouteStatusView> {
    match api::get_route_status(state.store.as_ref(), &id).await {
        Ok(view) => ok(view),
        Err(e) => ApiError::from(e).into_err(),
    }
}
