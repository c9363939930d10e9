//! HTTP control plane: call lifecycle RPCs plus health/readiness/metrics
//! (spec §6). Grounded on the teacher's router assembly — CORS layer built
//! from configured origins, trace/compression layers, auth middleware — with
//! the tool/MCP/domain-config routes dropped in favour of the three
//! call-lifecycle endpoints spec §6 names.

use axum::extract::{Json, Path, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Router};
use callbroker_core::{CallId, Role};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::ws_handler;

pub fn create_router(state: AppState) -> Router {
    let settings = state.get_settings();
    let cors_layer = build_cors_layer(&settings.server.cors_origins, settings.server.cors_enabled);
    drop(settings);

    Router::new()
        .route("/calls", post(create_call))
        .route("/calls/:id", get(call_status))
        .route("/calls/:id/end", post(end_call))
        .route("/healthz", get(health_check))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .layer(axum::middleware::from_fn(auth_middleware))
        .layer(Extension(state.settings.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (not for production)");
        return CorsLayer::permissive();
    }

    if origins.is_empty() {
        tracing::info!("no CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin, "invalid CORS origin");
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::error!("all configured CORS origins are invalid, falling back to localhost");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_credentials(true)
}

#[derive(Debug, Deserialize)]
struct CreateCallRequest {
    call_id: String,
    role: String,
}

#[derive(Debug, Serialize)]
struct CreateCallResponse {
    call_id: String,
    websocket_url: String,
}

/// POST /calls — pre-provisions a call id and returns the WebSocket URL a
/// leg should connect to (spec §6). Attaching actually happens on the `/ws`
/// upgrade; this endpoint does not itself create a session.
async fn create_call(Json(request): Json<CreateCallRequest>) -> Result<Json<CreateCallResponse>, StatusCode> {
    if Role::parse(&request.role).is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(CreateCallResponse {
        websocket_url: format!("/ws?call_id={}&role={}", request.call_id, request.role),
        call_id: request.call_id,
    }))
}

#[derive(Debug, Serialize)]
struct CallStatusResponse {
    call_id: String,
    state: String,
    legs_present: Vec<String>,
    started_at: chrono::DateTime<chrono::Utc>,
    last_activity: chrono::DateTime<chrono::Utc>,
}

async fn call_status(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<CallStatusResponse>, StatusCode> {
    let call_id = CallId::new(id.clone());
    let session = state.registry.lookup(&call_id).ok_or(StatusCode::NOT_FOUND)?;
    let status = session.status().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(CallStatusResponse {
        call_id: id,
        state: format!("{:?}", status.state),
        legs_present: status.legs_present.iter().map(|role| role.as_str().to_string()).collect(),
        started_at: status.started_at,
        last_activity: status.last_activity,
    }))
}

async fn end_call(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.registry.end(&CallId::new(id));
    StatusCode::NO_CONTENT
}

async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let active = state.registry.active_count();
    let max = state.get_settings().broker.max_sessions;
    let ready = active < max;

    (
        if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE },
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "saturated" },
            "active_sessions": active,
            "max_sessions": max,
        })),
    )
}
