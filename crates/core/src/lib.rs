//! Domain types, wire envelopes and collaborator interfaces for the live
//! call broker. This crate has no I/O of its own — it is consumed by
//! `callbroker-pipeline`, `callbroker-llm`, `callbroker-persistence` and
//! `callbroker-server`.

pub mod audio;
pub mod coaching;
pub mod collaborator;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod intelligence;
pub mod transcript;

pub use audio::{AudioBuffer, AudioChunk, AudioFrame, Channels, Codec, SampleRate};
pub use coaching::{CoachingSuggestion, Strategy};
pub use collaborator::{
    CoachPlan, ExtractionResult, IntelligenceSink, SpeechToText, SynthesizedAudio, TextGenerator,
    TextToSpeech, TranscriptSink, TranscriptionResult, UrlScanResult, UrlScanner,
};
pub use envelope::{AudioPayload, Envelope};
pub use error::BrokerError;
pub use ids::{CallId, Role};
pub use intelligence::{Entity, EntityKind, IntelligenceSnapshot, Tactic};
pub use transcript::TranscriptEntry;
