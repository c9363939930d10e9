//! Call registry (spec §4.1): maps a `CallId` to its running session actor.
//! Grounded on the teacher's `SessionManager` — a sharded map plus a
//! background reaper — generalized from TTL-based expiry to reaping driven
//! by the session actor's own cancellation token, since a call's lifetime is
//! governed by the leg state machine (spec §4.7), not a fixed idle timeout.

use crate::session::{CallSession, SessionDeps};
use callbroker_core::{BrokerError, CallId, IntelligenceSink, Role, SpeechToText, TextGenerator, TextToSpeech, TranscriptSink, UrlScanner};
use callbroker_pipeline::coaching::CoachingAdapter;
use callbroker_pipeline::intelligence::IntelligenceExtractor;
use callbroker_pipeline::{AnalysisDispatcher, EndpointingConfig};
use dashmap::DashMap;
use std::sync::Arc;

/// Collaborator handles shared across every call. A fresh `AnalysisDispatcher`
/// (and the `IntelligenceExtractor`/`CoachingAdapter` pair it wraps) is built
/// per call from these, since the dispatcher carries per-session mutable
/// state (the running intelligence snapshot, the in-flight coaching guard)
/// that must not leak between calls.
pub struct Collaborators {
    pub stt: Arc<dyn SpeechToText>,
    pub text_generator: Arc<dyn TextGenerator>,
    pub tts: Arc<dyn TextToSpeech>,
    pub url_scanner: Arc<dyn UrlScanner>,
    pub transcript_sink: Arc<dyn TranscriptSink>,
    pub intelligence_sink: Arc<dyn IntelligenceSink>,
    pub coaching_voice_id: String,
    pub egress_queue_capacity: usize,
    pub drain_grace_ms: u64,
    pub recording_dir: Option<String>,
    pub endpointing: EndpointingConfig,
}

pub struct CallRegistry {
    sessions: DashMap<CallId, Arc<CallSession>>,
    collaborators: Arc<Collaborators>,
}

impl CallRegistry {
    pub fn new(collaborators: Arc<Collaborators>) -> Arc<Self> {
        Arc::new(Self { sessions: DashMap::new(), collaborators })
    }

    /// Attaches `role` to `call_id`'s session, creating a new session if
    /// none exists or the previous one has already ended (spec §4.1: an
    /// attach against an unknown or ended id starts a fresh call).
    pub async fn attach(
        self: &Arc<Self>,
        call_id: CallId,
        role: Role,
    ) -> Result<(Arc<CallSession>, crate::session::LegHandle), BrokerError> {
        loop {
            let session = self
                .sessions
                .entry(call_id.clone())
                .or_insert_with(|| self.spawn_session(call_id.clone()))
                .clone();

            match session.attach_leg(role).await {
                Ok(leg) => return Ok((session, leg)),
                Err(BrokerError::InternalInvariantViolation { .. }) => {
                    // Session already tore itself down between the lookup
                    // and the attach call; the reaper just hasn't removed
                    // it from the map yet. Retry against a fresh session.
                    self.sessions.remove_if(&call_id, |_, existing| Arc::ptr_eq(existing, &session));
                    continue;
                },
                Err(other) => return Err(other),
            }
        }
    }

    pub fn lookup(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        self.sessions.get(call_id).map(|entry| entry.clone())
    }

    pub fn end(&self, call_id: &CallId) {
        if let Some(session) = self.lookup(call_id) {
            session.submit_end("requested");
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    fn spawn_session(self: &Arc<Self>, call_id: CallId) -> Arc<CallSession> {
        let collaborators = self.collaborators.clone();
        let intelligence = Arc::new(IntelligenceExtractor::new(collaborators.text_generator.clone(), collaborators.url_scanner.clone()));
        let coaching = Arc::new(CoachingAdapter::new(
            collaborators.text_generator.clone(),
            collaborators.tts.clone(),
            collaborators.coaching_voice_id.clone(),
        ));
        let dispatcher = Arc::new(AnalysisDispatcher::new(intelligence, coaching));

        let deps = SessionDeps {
            stt: collaborators.stt.clone(),
            dispatcher,
            transcript_sink: collaborators.transcript_sink.clone(),
            intelligence_sink: collaborators.intelligence_sink.clone(),
            egress_queue_capacity: collaborators.egress_queue_capacity,
            drain_grace_ms: collaborators.drain_grace_ms,
            recording_dir: collaborators.recording_dir.clone(),
            endpointing: collaborators.endpointing,
        };

        let session = Arc::new(CallSession::spawn(call_id.clone(), deps));
        self.spawn_reaper(call_id, session.clone());
        session
    }

    /// Watches the session's cancellation token (fired once by its `Ended`
    /// transition) and removes it from the map, avoiding a reference cycle
    /// between the registry and the session it owns.
    fn spawn_reaper(self: &Arc<Self>, call_id: CallId, session: Arc<CallSession>) {
        let registry = self.clone();
        tokio::spawn(async move {
            session.cancel_token().cancelled().await;
            registry.sessions.remove_if(&call_id, |_, existing| Arc::ptr_eq(existing, &session));
        });
    }
}
