//! Coaching Agent Adapter (spec §4.5): turns a context window of recent
//! transcript entries into a spoken coaching suggestion. Failures in either
//! the LLM or TTS leg are logged and localised — a coaching cycle that
//! fails never touches the audio relay path (spec §4.6, §7).

use callbroker_core::{BrokerError, CoachingSuggestion, TextGenerator, TextToSpeech, TranscriptEntry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct CoachingAdapter {
    text_generator: Arc<dyn TextGenerator>,
    tts: Arc<dyn TextToSpeech>,
    voice_id: String,
}

impl CoachingAdapter {
    pub fn new(text_generator: Arc<dyn TextGenerator>, tts: Arc<dyn TextToSpeech>, voice_id: impl Into<String>) -> Self {
        Self {
            text_generator,
            tts,
            voice_id: voice_id.into(),
        }
    }

    /// Produce one coaching suggestion from `context_window` (last N entries
    /// from both legs, most recent first — spec §4.5). Returns `None` if the
    /// LLM call itself fails; a TTS failure still returns text-only
    /// coaching rather than dropping the whole suggestion, since the
    /// operator can read the text envelope even without audio.
    pub async fn coach(&self, context_window: &[TranscriptEntry], cancel: CancellationToken) -> Option<CoachingSuggestion> {
        let plan = {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.text_generator.coach(context_window, cancel.clone()).await {
                    Ok(plan) => break plan,
                    Err(BrokerError::CollaboratorTransient(reason)) if attempt == 1 => {
                        tracing::warn!(reason, "coaching llm call failed, retrying once");
                        continue;
                    },
                    Err(BrokerError::CollaboratorFatal(reason)) => {
                        tracing::error!(reason, "coaching disabled for session: fatal collaborator error");
                        return None;
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "coaching llm call failed, no suggestion produced");
                        return None;
                    },
                }
            }
        };

        let mut suggestion = CoachingSuggestion::new(plan.text.clone(), plan.strategy, plan.intent);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.tts.synthesize(&plan.text, &self.voice_id, cancel.clone()).await {
                Ok(audio) => {
                    suggestion = suggestion.with_audio(audio.codec, audio.bytes);
                    break;
                },
                Err(BrokerError::CollaboratorTransient(reason)) if attempt == 1 => {
                    tracing::warn!(reason, "tts call failed, retrying once");
                    continue;
                },
                Err(err) => {
                    tracing::warn!(error = %err, "tts synthesis failed, emitting coaching without audio");
                    break;
                },
            }
        }

        Some(suggestion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callbroker_core::{CoachPlan, Codec, ExtractionResult, Role, Strategy, SynthesizedAudio};

    struct FixedLlm;

    #[async_trait]
    impl TextGenerator for FixedLlm {
        async fn extract_entities(&self, _text: &str, _cancel: CancellationToken) -> Result<ExtractionResult, BrokerError> {
            unreachable!("not exercised in these tests")
        }

        async fn coach(&self, _context_window: &[TranscriptEntry], _cancel: CancellationToken) -> Result<CoachPlan, BrokerError> {
            Ok(CoachPlan {
                text: "Can you tell me more about that request?".to_string(),
                strategy: Strategy::InformationExtraction,
                intent: "stall_and_probe".to_string(),
            })
        }
    }

    struct FailingTts;

    #[async_trait]
    impl TextToSpeech for FailingTts {
        async fn synthesize(&self, _text: &str, _voice_id: &str, _cancel: CancellationToken) -> Result<SynthesizedAudio, BrokerError> {
            Err(BrokerError::CollaboratorTransient("tts down".into()))
        }
    }

    struct WorkingTts;

    #[async_trait]
    impl TextToSpeech for WorkingTts {
        async fn synthesize(&self, _text: &str, _voice_id: &str, _cancel: CancellationToken) -> Result<SynthesizedAudio, BrokerError> {
            Ok(SynthesizedAudio {
                codec: Codec::Mp3,
                bytes: vec![1, 2, 3],
            })
        }
    }

    fn sample_window() -> Vec<TranscriptEntry> {
        vec![TranscriptEntry::new(
            Role::Scammer,
            "please share your otp",
            None,
            0.9,
            chrono::Utc::now(),
            chrono::Utc::now(),
        )]
    }

    #[tokio::test]
    async fn tts_failure_still_yields_text_only_suggestion() {
        let adapter = CoachingAdapter::new(Arc::new(FixedLlm), Arc::new(FailingTts), "voice-1");
        let suggestion = adapter.coach(&sample_window(), CancellationToken::new()).await.unwrap();
        assert_eq!(suggestion.strategy, Strategy::InformationExtraction);
        assert!(suggestion.audio.is_none());
    }

    #[tokio::test]
    async fn successful_tts_attaches_audio_and_codec() {
        let adapter = CoachingAdapter::new(Arc::new(FixedLlm), Arc::new(WorkingTts), "voice-1");
        let suggestion = adapter.coach(&sample_window(), CancellationToken::new()).await.unwrap();
        assert_eq!(suggestion.audio, Some(vec![1, 2, 3]));
        assert_eq!(suggestion.audio_codec, Some(Codec::Mp3));
    }
}
