//! `TranscriptSink`/`IntelligenceSink` implementations: a ScyllaDB-backed
//! best-effort writer and an in-memory fake for tests (spec §6, grounded on
//! the teacher's `SessionStore`/`ScyllaSessionStore` split).

use crate::client::ScyllaClient;
use callbroker_core::{BrokerError, CallId, IntelligenceSink, IntelligenceSnapshot, TranscriptEntry, TranscriptSink};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ScyllaTranscriptSink {
    client: ScyllaClient,
}

impl ScyllaTranscriptSink {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl TranscriptSink for ScyllaTranscriptSink {
    async fn append_transcript(&self, call_id: &CallId, entry: &TranscriptEntry) -> Result<(), BrokerError> {
        let query = format!(
            "INSERT INTO {}.transcript_entries (call_id, seq, speaker, text, language, confidence, started_at, ended_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    call_id.as_str(),
                    entry.seq as i64,
                    entry.speaker.as_str(),
                    entry.text.as_str(),
                    entry.language.as_deref(),
                    entry.confidence,
                    entry.started_at,
                    entry.ended_at,
                ),
            )
            .await
            .map_err(|e| BrokerError::CollaboratorTransient(e.to_string()))?;

        Ok(())
    }
}

pub struct ScyllaIntelligenceSink {
    client: ScyllaClient,
}

impl ScyllaIntelligenceSink {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl IntelligenceSink for ScyllaIntelligenceSink {
    async fn update_intelligence(
        &self,
        call_id: &CallId,
        snapshot: &IntelligenceSnapshot,
    ) -> Result<(), BrokerError> {
        let entities_json = serde_json::to_string(&snapshot.entities)
            .map_err(|e| BrokerError::CollaboratorTransient(e.to_string()))?;
        let tactics_json = serde_json::to_string(&snapshot.tactics)
            .map_err(|e| BrokerError::CollaboratorTransient(e.to_string()))?;

        let query = format!(
            "INSERT INTO {}.intelligence_snapshots (call_id, updated_at, entities_json, tactics_json, threat_score) VALUES (?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    call_id.as_str(),
                    snapshot.updated_at,
                    entities_json,
                    tactics_json,
                    snapshot.threat_score,
                ),
            )
            .await
            .map_err(|e| BrokerError::CollaboratorTransient(e.to_string()))?;

        Ok(())
    }
}

/// In-memory fake used by the test suite and by deployments that run
/// without ScyllaDB (`broker.recording_sink`/persistence left unconfigured).
#[derive(Default)]
pub struct InMemorySink {
    transcripts: Mutex<HashMap<CallId, Vec<TranscriptEntry>>>,
    snapshots: Mutex<HashMap<CallId, IntelligenceSnapshot>>,
}

impl InMemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transcript_for(&self, call_id: &CallId) -> Vec<TranscriptEntry> {
        self.transcripts.lock().get(call_id).cloned().unwrap_or_default()
    }

    pub fn snapshot_for(&self, call_id: &CallId) -> Option<IntelligenceSnapshot> {
        self.snapshots.lock().get(call_id).cloned()
    }
}

#[async_trait::async_trait]
impl TranscriptSink for InMemorySink {
    async fn append_transcript(&self, call_id: &CallId, entry: &TranscriptEntry) -> Result<(), BrokerError> {
        self.transcripts
            .lock()
            .entry(call_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl IntelligenceSink for InMemorySink {
    async fn update_intelligence(
        &self,
        call_id: &CallId,
        snapshot: &IntelligenceSnapshot,
    ) -> Result<(), BrokerError> {
        self.snapshots.lock().insert(call_id.clone(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbroker_core::Role;
    use chrono::Utc;

    #[tokio::test]
    async fn in_memory_sink_records_appended_entries() {
        let sink = InMemorySink::new();
        let call_id = CallId::new("c1");
        let entry = TranscriptEntry::new(Role::Scammer, "hello", None, 0.9, Utc::now(), Utc::now());

        sink.append_transcript(&call_id, &entry).await.unwrap();

        assert_eq!(sink.transcript_for(&call_id).len(), 1);
    }
}
