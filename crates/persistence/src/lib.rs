//! Best-effort persistence for the live call broker: transcript/intelligence
//! sinks (ScyllaDB-backed, with in-memory fakes for tests) and the
//! append-only audio recording log.

pub mod client;
pub mod error;
pub mod recording;
pub mod schema;
pub mod sinks;

pub use client::{ScyllaClient, ScyllaConfig};
pub use error::PersistenceError;
pub use recording::RecordingLog;
pub use sinks::{InMemorySink, ScyllaIntelligenceSink, ScyllaTranscriptSink};

/// Connect to ScyllaDB and ensure the keyspace/tables exist, returning
/// ready-to-use sinks.
pub async fn connect(
    config: ScyllaConfig,
) -> Result<(ScyllaTranscriptSink, ScyllaIntelligenceSink), PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok((
        ScyllaTranscriptSink::new(client.clone()),
        ScyllaIntelligenceSink::new(client),
    ))
}
