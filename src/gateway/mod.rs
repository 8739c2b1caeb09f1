pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use utoipa::OpenApi;

use state::AppState;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDoc::openapi())
}

/// Assemble the HTTP router over shared state
pub fn build_router(state: Arc<AppState>) -> Router {
    let routes = Router::new()
        .route("/routes", post(handlers::create_route))
        .route("/routes/{id}", get(handlers::get_route))
        .route("/routes/{id}/step", post(handlers::step_route))
        .route("/health", get(handlers::health_check));

    Router::new()
        .nest("/api/v1", routes)
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on http://{}", addr);
    tracing::info!("OpenAPI JSON at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
