//! Analysis Dispatcher (spec §4.5): fans a finalised scammer-leg transcript
//! out to the intelligence and coaching lanes in parallel. Intelligence
//! extraction always runs to completion; a new transcript arriving while a
//! coaching job is still in flight cancels that job in favour of the fresh
//! context window (spec §4.5, §9 "model the analysis dispatcher as a
//! supervised task group with per-lane cancellation").
//!
//! Grounded on `orchestrator.rs`'s event-driven `PipelineEvent` dispatch: a
//! per-event `tokio::spawn` reporting back over a channel, generalized from
//! one pipeline's sequential STT→LLM→TTS chain to two independent lanes.

use crate::coaching::CoachingAdapter;
use crate::intelligence::{IntelligenceExtractor, IntelligenceUpdate};
use callbroker_core::{CoachingSuggestion, IntelligenceSnapshot, TranscriptEntry};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What each lane reports back once it completes. Emission order between
/// the two variants is not guaranteed at this layer (spec §4.5) — ordering
/// any resulting envelopes so a `coaching` never outruns the `intelligence`
/// snapshot it was built from (spec §7) is the session's responsibility.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Intelligence(IntelligenceUpdate),
    Coaching(CoachingSuggestion),
}

pub struct AnalysisDispatcher {
    intelligence: Arc<IntelligenceExtractor>,
    coaching: Arc<CoachingAdapter>,
    snapshot: Arc<Mutex<IntelligenceSnapshot>>,
    coaching_inflight: Mutex<Option<CancellationToken>>,
}

impl AnalysisDispatcher {
    pub fn new(intelligence: Arc<IntelligenceExtractor>, coaching: Arc<CoachingAdapter>) -> Self {
        Self {
            intelligence,
            coaching,
            snapshot: Arc::new(Mutex::new(IntelligenceSnapshot::default())),
            coaching_inflight: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> IntelligenceSnapshot {
        self.snapshot.lock().clone()
    }

    /// Dispatch one finalised scammer-leg transcript. `context_window` is
    /// the last N entries from both legs, most recent first (spec §4.5).
    /// `session_cancel` is fired exactly once by the owning session's
    /// `Ended` transition (spec §9); every spawned task inherits it.
    pub fn dispatch(
        &self,
        entry: TranscriptEntry,
        context_window: Vec<TranscriptEntry>,
        session_cancel: CancellationToken,
        events: mpsc::UnboundedSender<DispatchEvent>,
    ) {
        self.spawn_intelligence_lane(entry.text, session_cancel.clone(), events.clone());
        self.spawn_coaching_lane(context_window, session_cancel, events);
    }

    fn spawn_intelligence_lane(
        &self,
        text: String,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<DispatchEvent>,
    ) {
        let extractor = self.intelligence.clone();
        let snapshot = self.snapshot.clone();
        let update_feed = events.clone();

        tokio::spawn(async move {
            let (probe_tx, mut probe_rx) = mpsc::unbounded_channel();

            // The reputation probe may report a follow-up update well after
            // this call returns; relay it to the session as it arrives.
            let events_for_probe = update_feed.clone();
            tokio::spawn(async move {
                while let Some(update) = probe_rx.recv().await {
                    let _ = events_for_probe.send(DispatchEvent::Intelligence(update));
                }
            });

            if let Some(update) = extractor.extract(&text, &snapshot, probe_tx, cancel).await {
                let _ = update_feed.send(DispatchEvent::Intelligence(update));
            }
        });
    }

    fn spawn_coaching_lane(
        &self,
        context_window: Vec<TranscriptEntry>,
        session_cancel: CancellationToken,
        events: mpsc::UnboundedSender<DispatchEvent>,
    ) {
        let lane_cancel = session_cancel.child_token();
        {
            let mut inflight = self.coaching_inflight.lock();
            if let Some(previous) = inflight.take() {
                previous.cancel();
            }
            *inflight = Some(lane_cancel.clone());
        }

        let coaching = self.coaching.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = lane_cancel.cancelled() => {},
                result = coaching.coach(&context_window, lane_cancel.clone()) => {
                    if let Some(suggestion) = result {
                        let _ = events.send(DispatchEvent::Coaching(suggestion));
                    }
                },
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coaching::CoachingAdapter;
    use crate::intelligence::IntelligenceExtractor;
    use async_trait::async_trait;
    use callbroker_core::{
        BrokerError, CoachPlan, ExtractionResult, Role, Strategy, SynthesizedAudio, TextGenerator, TextToSpeech,
        UrlScanResult, UrlScanner,
    };
    use std::time::Duration;

    struct StubLlm;

    #[async_trait]
    impl TextGenerator for StubLlm {
        async fn extract_entities(&self, _text: &str, _cancel: CancellationToken) -> Result<ExtractionResult, BrokerError> {
            Ok(ExtractionResult::default())
        }

        async fn coach(&self, _context_window: &[TranscriptEntry], _cancel: CancellationToken) -> Result<CoachPlan, BrokerError> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(CoachPlan {
                text: "stay calm".to_string(),
                strategy: Strategy::Delay,
                intent: "delay".to_string(),
            })
        }
    }

    struct StubTts;

    #[async_trait]
    impl TextToSpeech for StubTts {
        async fn synthesize(&self, _text: &str, _voice_id: &str, _cancel: CancellationToken) -> Result<SynthesizedAudio, BrokerError> {
            Ok(SynthesizedAudio {
                codec: callbroker_core::Codec::Mp3,
                bytes: vec![],
            })
        }
    }

    struct StubScanner;

    #[async_trait]
    impl UrlScanner for StubScanner {
        async fn check(&self, _url: &str, _cancel: CancellationToken) -> Result<UrlScanResult, BrokerError> {
            Ok(UrlScanResult {
                is_safe: true,
                risk_score: 0.0,
                labels: vec![],
            })
        }
    }

    fn dispatcher() -> AnalysisDispatcher {
        let intelligence = Arc::new(IntelligenceExtractor::new(Arc::new(StubLlm), Arc::new(StubScanner)));
        let coaching = Arc::new(CoachingAdapter::new(Arc::new(StubLlm), Arc::new(StubTts), "voice-1"));
        AnalysisDispatcher::new(intelligence, coaching)
    }

    fn entry(text: &str) -> TranscriptEntry {
        TranscriptEntry::new(Role::Scammer, text, None, 0.9, chrono::Utc::now(), chrono::Utc::now())
    }

    #[tokio::test]
    async fn coaching_burst_cancels_previous_inflight_job() {
        let dispatcher = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session_cancel = CancellationToken::new();

        dispatcher.dispatch(entry("please share your otp"), vec![entry("hello")], session_cancel.clone(), tx.clone());
        // Immediately superseded — the first coaching task should be cancelled before it finishes its 30ms sleep.
        dispatcher.dispatch(entry("urgent, act now"), vec![entry("hello"), entry("urgent, act now")], session_cancel, tx);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let mut coaching_events = 0;
        let mut intelligence_events = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                DispatchEvent::Coaching(_) => coaching_events += 1,
                DispatchEvent::Intelligence(_) => intelligence_events += 1,
            }
        }

        assert_eq!(coaching_events, 1, "the cancelled first coaching job must not also report");
        assert!(intelligence_events >= 2, "intelligence lane is never cancelled by coalescing");
    }
}
