//! `axum`-based HTTP control surface: a pure observation/control facade. It performs no
//! MCP traffic itself.

mod routes;

use crate::orchestrator::OrchestratorHandle;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the router exposing `/healthz`, `/readyz`, `/metrics`, `/servers`,
/// `/servers/:name`.
#[must_use]
pub fn router(handle: OrchestratorHandle) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(handle)
}
