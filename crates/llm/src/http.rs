//! Shared request plumbing for the collaborator adapters: a per-adapter
//! timeout-bound `reqwest::Client` plus classification of failures into the
//! broker's `CollaboratorTransient`/`CollaboratorFatal` split (spec §7).
//!
//! Grounded on `backend.rs`'s `OllamaBackend`/`OpenAIBackend` request
//! plumbing — client-builder-with-timeout and 5xx-vs-4xx classification kept,
//! the retry-with-backoff loop dropped: retrying a failed collaborator call
//! once is a call-site policy owned by `callbroker-pipeline` (transcriber,
//! intelligence extractor, coaching adapter), not something every adapter
//! should reimplement.

use callbroker_core::BrokerError;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn build_client(timeout: Duration) -> Result<Client, BrokerError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| BrokerError::CollaboratorFatal(format!("failed to build http client: {err}")))
}

/// Race a request future against cancellation, then classify the outcome.
pub async fn run_cancellable<T>(
    cancel: CancellationToken,
    request: impl std::future::Future<Output = reqwest::Result<T>>,
) -> Result<T, BrokerError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(BrokerError::CollaboratorTransient("cancelled".to_string())),
        result = request => result.map_err(classify_transport_error),
    }
}

pub fn classify_transport_error(err: reqwest::Error) -> BrokerError {
    if err.is_timeout() || err.is_connect() {
        BrokerError::CollaboratorTransient(err.to_string())
    } else {
        BrokerError::CollaboratorFatal(err.to_string())
    }
}

pub fn classify_status(status: StatusCode, body: &str) -> BrokerError {
    if status.is_server_error() {
        BrokerError::CollaboratorTransient(format!("http {status}: {body}"))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        BrokerError::CollaboratorFatal(format!("http {status}: {body}"))
    } else {
        BrokerError::CollaboratorFatal(format!("http {status}: {body}"))
    }
}
