//! Live Call Broker Server
//!
//! WebSocket and HTTP front door: call registry, per-call session actors,
//! and the control plane (spec §4, §6).

pub mod auth;
pub mod egress;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod session;
pub mod state;
pub mod websocket;

pub use auth::auth_middleware;
pub use http::create_router;
pub use metrics::{
    init_metrics, record_error, record_llm_latency, record_request, record_stt_latency,
    record_total_latency, record_tts_latency,
};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use registry::{CallRegistry, Collaborators};
pub use session::{CallSession, CallStatus, SessionDeps, SessionState};
pub use state::AppState;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("call error: {0}")]
    Call(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Call(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::RateLimit => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<callbroker_core::BrokerError> for ServerError {
    fn from(err: callbroker_core::BrokerError) -> Self {
        match err {
            callbroker_core::BrokerError::ClientProtocol { message, .. } => ServerError::InvalidRequest(message),
            callbroker_core::BrokerError::RoleOccupied => ServerError::Call("role already occupied".to_string()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
