//! In-memory collaborator fakes for integration tests that don't need a real
//! STT/LLM/TTS/URL-scan backend, grounded on `persistence`'s in-memory sink
//! split (real backend vs. in-memory fake, same trait either way).

use async_trait::async_trait;
use callbroker_core::{
    BrokerError, Codec, CoachPlan, ExtractionResult, Strategy, SpeechToText, SynthesizedAudio, TextGenerator,
    TextToSpeech, TranscriptEntry, TranscriptionResult, UrlScanResult, UrlScanner,
};
use tokio_util::sync::CancellationToken;

/// Echoes a fixed transcript regardless of input audio.
pub struct EchoSpeechToText {
    pub text: String,
}

#[async_trait]
impl SpeechToText for EchoSpeechToText {
    async fn transcribe(
        &self,
        _pcm16: &[u8],
        _language_hint: Option<&str>,
        _cancel: CancellationToken,
    ) -> Result<TranscriptionResult, BrokerError> {
        Ok(TranscriptionResult {
            text: self.text.clone(),
            language: Some("en".to_string()),
            confidence: 1.0,
        })
    }
}

/// Never finds entities, always proposes a delay strategy.
pub struct NoopTextGenerator;

#[async_trait]
impl TextGenerator for NoopTextGenerator {
    async fn extract_entities(&self, _text: &str, _cancel: CancellationToken) -> Result<ExtractionResult, BrokerError> {
        Ok(ExtractionResult::default())
    }

    async fn coach(&self, _context_window: &[TranscriptEntry], _cancel: CancellationToken) -> Result<CoachPlan, BrokerError> {
        Ok(CoachPlan {
            text: "Take a moment before sharing any details.".to_string(),
            strategy: Strategy::Delay,
            intent: "stall".to_string(),
        })
    }
}

/// Returns silent placeholder audio tagged as WAV PCM.
pub struct SilentTextToSpeech;

#[async_trait]
impl TextToSpeech for SilentTextToSpeech {
    async fn synthesize(&self, _text: &str, _voice_id: &str, _cancel: CancellationToken) -> Result<SynthesizedAudio, BrokerError> {
        Ok(SynthesizedAudio {
            codec: Codec::WavPcm,
            bytes: vec![],
        })
    }
}

/// Reports every URL as safe.
pub struct SafeUrlScanner;

#[async_trait]
impl UrlScanner for SafeUrlScanner {
    async fn check(&self, _url: &str, _cancel: CancellationToken) -> Result<UrlScanResult, BrokerError> {
        Ok(UrlScanResult {
            is_safe: true,
            risk_score: 0.0,
            labels: vec![],
        })
    }
}
