//! Interfaces to the external collaborators the core never owns: STT, the
//! LLM (used for both entity extraction and coaching), TTS, the URL
//! reputation scanner, and best-effort persistence sinks (spec §6).
//!
//! Every call takes a `CancellationToken` scoped to the owning session —
//! the session's `Ended` transition fires it exactly once (spec §5, §9).
//! Real implementations live in `callbroker-llm`/`callbroker-persistence`;
//! in-memory fakes of the same traits back the test suite.

use crate::audio::Codec;
use crate::coaching::Strategy;
use crate::error::BrokerError;
use crate::ids::CallId;
use crate::intelligence::{Entity, IntelligenceSnapshot};
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: Option<String>,
    pub confidence: f32,
}

/// `stt.transcribe(pcm_16k_mono, language_hint?) → {text, language, confidence}` (spec §6).
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(
        &self,
        pcm16_mono_16khz: &[u8],
        language_hint: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<TranscriptionResult, BrokerError>;
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone)]
pub struct CoachPlan {
    pub text: String,
    pub strategy: Strategy,
    pub intent: String,
}

/// `llm.extract_entities(text)` and `llm.coach(context_window)` (spec §6,
/// §4.6 Stage B). One trait because both operations are "submit text(s),
/// get schema-shaped output back" against the same collaborator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn extract_entities(
        &self,
        transcript_text: &str,
        cancel: CancellationToken,
    ) -> Result<ExtractionResult, BrokerError>;

    async fn coach(
        &self,
        context_window: &[TranscriptEntry],
        cancel: CancellationToken,
    ) -> Result<CoachPlan, BrokerError>;
}

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub codec: Codec,
    pub bytes: Vec<u8>,
}

/// `tts.synthesize(text, voice_id) → bytes` (spec §6). The core passes the
/// bytes through unchanged and tags the codec on the outbound envelope.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        cancel: CancellationToken,
    ) -> Result<SynthesizedAudio, BrokerError>;
}

#[derive(Debug, Clone)]
pub struct UrlScanResult {
    pub is_safe: bool,
    pub risk_score: f32,
    pub labels: Vec<String>,
}

/// `url_scanner.check(url) → {is_safe, risk_score, labels}` (spec §6).
/// Asynchronous, fire-and-forget from the hot path.
#[async_trait]
pub trait UrlScanner: Send + Sync {
    async fn check(&self, url: &str, cancel: CancellationToken) -> Result<UrlScanResult, BrokerError>;
}

/// `persistence.append_transcript(call_id, entry)` (spec §6). Best-effort:
/// failures are logged by the caller but never affect call flow.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn append_transcript(&self, call_id: &CallId, entry: &TranscriptEntry) -> Result<(), BrokerError>;
}

/// `persistence.update_intelligence(call_id, snapshot)` (spec §6).
#[async_trait]
pub trait IntelligenceSink: Send + Sync {
    async fn update_intelligence(&self, call_id: &CallId, snapshot: &IntelligenceSnapshot) -> Result<(), BrokerError>;
}
