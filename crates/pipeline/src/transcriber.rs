//! Streaming Transcriber (spec §4.4): one instance per leg. Accumulates a
//! rolling canonical-PCM buffer and decides, per ingested frame, whether to
//! fire a transcription attempt. `ingest` is O(1) and never awaits; the STT
//! call itself is a separate async step the caller drives once a trigger
//! fires, grounded on `orchestrator.rs`'s pattern of a cheap per-frame state
//! update paired with a heavier async step taken only on state transitions.

use callbroker_config::constants::transcriber as thresholds;
use callbroker_core::{AudioBuffer, AudioFrame, BrokerError, Channels, Role, SampleRate, SpeechToText, TranscriptEntry};
use chrono::Utc;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Frames at or below this energy are treated as silence for endpointing
/// purposes (spec §4.4 "speech-activity estimator").
const SPEECH_ENERGY_THRESHOLD_DB: f32 = -40.0;

/// The two endpointing knobs spec §6's "Environment / configuration" table
/// names explicitly (`stt_window_seconds`, `endpoint_silence_ms`); the
/// discard-window and minimum-before-endpoint thresholds stay fixed
/// constants since the spec never exposes them as settings.
#[derive(Debug, Clone, Copy)]
pub struct EndpointingConfig {
    pub voiced_window_seconds: f64,
    pub endpoint_silence_seconds: f64,
}

impl Default for EndpointingConfig {
    fn default() -> Self {
        Self {
            voiced_window_seconds: thresholds::MIN_VOICED_WINDOW_SECONDS,
            endpoint_silence_seconds: thresholds::ENDPOINT_SILENCE_SECONDS,
        }
    }
}

struct State {
    buffer: AudioBuffer,
    voiced_seconds: f64,
    silence_seconds: f64,
    window_start: Instant,
    sequence: u64,
}

impl State {
    fn new() -> Self {
        Self {
            buffer: AudioBuffer::new(SampleRate::Hz16000, Channels::Mono),
            voiced_seconds: 0.0,
            silence_seconds: 0.0,
            window_start: Instant::now(),
            sequence: 0,
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.voiced_seconds = 0.0;
        self.silence_seconds = 0.0;
        self.window_start = Instant::now();
    }
}

/// What `ingest` decided to do with the frame just pushed in.
enum Trigger {
    /// Keep accumulating.
    Continue,
    /// Enough voiced audio (or trailing silence after voiced audio) has
    /// accumulated — hand this window to STT.
    FireStt(Vec<f32>),
    /// A discard window elapsed without enough voiced audio; the buffer was
    /// reset without ever reaching STT.
    Discarded,
}

pub struct StreamingTranscriber {
    role: Role,
    config: EndpointingConfig,
    state: Mutex<State>,
}

impl StreamingTranscriber {
    pub fn new(role: Role, config: EndpointingConfig) -> Self {
        Self {
            role,
            config,
            state: Mutex::new(State::new()),
        }
    }

    /// Push one canonical (16kHz mono PCM16) chunk and, if this ingest
    /// pushed the buffer over a trigger, run the STT round trip and return
    /// the resulting `TranscriptEntry`. STT failures are retried once with
    /// the same window and otherwise logged and discarded (spec §4.4, §7
    /// `CollaboratorTransient`) — the audio relay path this method never
    /// touches is unaffected either way.
    pub async fn ingest(
        &self,
        pcm16_bytes: &[u8],
        stt: &dyn SpeechToText,
        language_hint: Option<&str>,
        cancel: CancellationToken,
    ) -> Option<TranscriptEntry> {
        let trigger = self.push(pcm16_bytes);

        let samples = match trigger {
            Trigger::Continue => return None,
            Trigger::Discarded => {
                tracing::debug!(role = %self.role, "transcriber window discarded below voiced floor");
                return None;
            },
            Trigger::FireStt(samples) => samples,
        };

        let started_at = Utc::now();
        let frame = AudioFrame::new(samples, SampleRate::Hz16000, Channels::Mono, 0);
        let pcm16 = frame.to_pcm16();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match stt.transcribe(&pcm16, language_hint, cancel.clone()).await {
                Ok(result) => {
                    return Some(TranscriptEntry::new(
                        self.role,
                        result.text,
                        result.language,
                        result.confidence,
                        started_at,
                        Utc::now(),
                    ));
                },
                Err(BrokerError::CollaboratorTransient(reason)) if attempt == 1 => {
                    tracing::warn!(role = %self.role, reason, "stt call failed, retrying once");
                    continue;
                },
                Err(err) => {
                    tracing::warn!(role = %self.role, error = %err, "stt call failed, dropping window");
                    return None;
                },
            }
        }
    }

    fn push(&self, pcm16_bytes: &[u8]) -> Trigger {
        let mut state = self.state.lock();
        state.sequence += 1;
        let frame = AudioFrame::from_pcm16(pcm16_bytes, SampleRate::Hz16000, Channels::Mono, state.sequence);
        let duration_s = frame.duration.as_secs_f64();
        let is_speech = !frame.is_likely_silence(SPEECH_ENERGY_THRESHOLD_DB);

        state.buffer.push(&frame);
        if is_speech {
            state.voiced_seconds += duration_s;
            state.silence_seconds = 0.0;
        } else {
            state.silence_seconds += duration_s;
        }

        if state.voiced_seconds >= self.config.voiced_window_seconds {
            let samples = state.buffer.take_all();
            state.reset();
            return Trigger::FireStt(samples);
        }

        if state.silence_seconds >= self.config.endpoint_silence_seconds
            && state.voiced_seconds >= thresholds::MIN_VOICED_BEFORE_ENDPOINT_SECONDS
        {
            let samples = state.buffer.take_all();
            state.reset();
            return Trigger::FireStt(samples);
        }

        let window_elapsed = state.window_start.elapsed() >= Duration::from_secs_f64(thresholds::DISCARD_WINDOW_SECONDS);
        if window_elapsed {
            if state.voiced_seconds < thresholds::DISCARD_VOICED_FLOOR_SECONDS {
                state.reset();
                return Trigger::Discarded;
            }
            // Enough voiced audio to keep waiting for an endpoint — slide
            // the discard window forward rather than dropping progress.
            state.window_start = Instant::now();
        }

        Trigger::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callbroker_core::TranscriptionResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedStt {
        text: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechToText for FixedStt {
        async fn transcribe(
            &self,
            _pcm16: &[u8],
            _language_hint: Option<&str>,
            _cancel: CancellationToken,
        ) -> Result<TranscriptionResult, BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TranscriptionResult {
                text: self.text.to_string(),
                language: Some("en".to_string()),
                confidence: 0.95,
            })
        }
    }

    struct AlwaysFailStt {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechToText for AlwaysFailStt {
        async fn transcribe(
            &self,
            _pcm16: &[u8],
            _language_hint: Option<&str>,
            _cancel: CancellationToken,
        ) -> Result<TranscriptionResult, BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::CollaboratorTransient("boom".into()))
        }
    }

    fn loud_chunk(ms: u64) -> Vec<u8> {
        let n = (16_000 * ms / 1000) as usize;
        let samples: Vec<i16> = (0..n).map(|i| if i % 2 == 0 { 8000 } else { -8000 }).collect();
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn silent_chunk(ms: u64) -> Vec<u8> {
        vec![0u8; (16_000 * ms / 1000) as usize * 2]
    }

    #[tokio::test]
    async fn voiced_window_triggers_transcription() {
        let transcriber = StreamingTranscriber::new(Role::Scammer, EndpointingConfig::default());
        let stt = FixedStt {
            text: "please share your otp",
            calls: AtomicUsize::new(0),
        };

        let mut entry = None;
        for _ in 0..16 {
            entry = transcriber
                .ingest(&loud_chunk(200), &stt, None, CancellationToken::new())
                .await;
            if entry.is_some() {
                break;
            }
        }

        let entry = entry.expect("expected a transcript entry once 3s voiced accumulated");
        assert_eq!(entry.speaker, Role::Scammer);
        assert_eq!(entry.text, "please share your otp");
        assert_eq!(stt.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn trailing_silence_after_voiced_speech_endpoints_early() {
        let transcriber = StreamingTranscriber::new(Role::Operator, EndpointingConfig::default());
        let stt = FixedStt {
            text: "hello there",
            calls: AtomicUsize::new(0),
        };

        // 600ms voiced (>= 0.5s floor), then silence until the 0.8s endpoint fires.
        let mut entry = transcriber.ingest(&loud_chunk(600), &stt, None, CancellationToken::new()).await;
        assert!(entry.is_none());
        for _ in 0..5 {
            entry = transcriber.ingest(&silent_chunk(200), &stt, None, CancellationToken::new()).await;
            if entry.is_some() {
                break;
            }
        }
        assert!(entry.is_some());
    }

    #[tokio::test]
    async fn stt_failure_retries_once_then_drops_window() {
        let transcriber = StreamingTranscriber::new(Role::Scammer, EndpointingConfig::default());
        let stt = AlwaysFailStt {
            calls: AtomicUsize::new(0),
        };

        let mut entry = None;
        for _ in 0..16 {
            entry = transcriber.ingest(&loud_chunk(200), &stt, None, CancellationToken::new()).await;
            if stt.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
        }

        assert!(entry.is_none());
        assert_eq!(stt.calls.load(Ordering::SeqCst), 2, "expected one retry after the first failure");
    }
}
