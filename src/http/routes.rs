use crate::config::ServerConfig;
use crate::error::OrchestratorError;
use crate::guards::RateLimitStatus;
use crate::health::ReadinessStatus;
use crate::orchestrator::OrchestratorHandle;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub fn router() -> Router<OrchestratorHandle> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/servers", get(list_servers))
        .route("/servers/:name", get(get_server))
}

fn readiness_str(status: ReadinessStatus) -> &'static str {
    match status {
        ReadinessStatus::Ok => "ok",
        ReadinessStatus::Degraded => "degraded",
        ReadinessStatus::Down => "down",
    }
}

async fn healthz(State(handle): State<OrchestratorHandle>) -> impl IntoResponse {
    let mut servers = HashMap::new();
    for server in handle.registry.enabled_servers() {
        let state = handle
            .board
            .get(&server.name)
            .map_or("unknown", |s| s.state.as_str())
            .to_string();
        servers.insert(server.name.clone(), state);
    }

    let overall_ok = handle.readiness() == ReadinessStatus::Ok;
    Json(json!({
        "status": if overall_ok { "healthy" } else { "unhealthy" },
        "timestamp": chrono::Utc::now(),
        "servers": servers,
    }))
}

async fn readyz(State(handle): State<OrchestratorHandle>) -> impl IntoResponse {
    let status = handle.readiness();
    let ready = status == ReadinessStatus::Ok;
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    let details: HashMap<String, bool> = handle
        .registry
        .enabled_servers()
        .map(|s| {
            let ok = handle.health_store.get(&s.name).is_some_and(|h| h.last_probe_ok);
            (s.name.clone(), ok)
        })
        .collect();

    (
        code,
        Json(json!({
            "ready": ready,
            "status": readiness_str(status),
            "details": details,
        })),
    )
}

async fn metrics(State(handle): State<OrchestratorHandle>) -> impl IntoResponse {
    match handle.metrics.export() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_servers(State(handle): State<OrchestratorHandle>) -> impl IntoResponse {
    let statuses = handle.board.all();
    Json(json!({ "servers": statuses }))
}

/// `GET /servers/:name`. With no `scope` query parameter this is a plain status lookup.
/// With one, the lookup is dispatched through scope auth, rate limit, circuit breaker, and
/// timeout guards (in that order) as any guarded call would be, and the response carries
/// `X-RateLimit-*` headers describing the server's current rate limit window.
async fn get_server(
    State(handle): State<OrchestratorHandle>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(server) = handle.registry.get(&name) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "server not found" }))).into_response();
    };

    let Some(required_scope) = params.get("scope") else {
        return handle.board.get(&name).map_or_else(
            || (StatusCode::NOT_FOUND, Json(json!({ "error": "server not found" }))).into_response(),
            |status| Json(status).into_response(),
        );
    };

    let mut response = dispatch_status_lookup(&handle, &server, required_scope).await;
    apply_rate_limit_headers(response.headers_mut(), &handle.guards.rate_limit_status(&server));
    response
}

async fn dispatch_status_lookup(handle: &OrchestratorHandle, server: &Arc<ServerConfig>, required_scope: &str) -> Response {
    let board = handle.board.clone();
    let name = server.name.clone();

    let result = handle
        .guards
        .dispatch(server, required_scope, || async move {
            board.get(&name).ok_or_else(|| OrchestratorError::ServerNotFound(name.clone()))
        })
        .await;

    match result {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

fn apply_rate_limit_headers(headers: &mut axum::http::HeaderMap, status: &RateLimitStatus) {
    let entries = [
        ("x-ratelimit-limit", status.limit.to_string()),
        ("x-ratelimit-remaining", status.remaining.to_string()),
        ("x-ratelimit-reset", status.reset_ms.to_string()),
    ];
    for (name, value) in entries {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}
