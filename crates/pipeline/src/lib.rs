//! Audio normalisation, streaming transcription, intelligence extraction
//! and coaching for the live call broker (spec §4.3–§4.6). Consumes the
//! collaborator traits from `callbroker-core`; never talks to a transport.

pub mod coaching;
pub mod dispatcher;
pub mod intelligence;
pub mod normalise;
pub mod transcriber;

pub use coaching::CoachingAdapter;
pub use dispatcher::AnalysisDispatcher;
pub use intelligence::IntelligenceExtractor;
pub use normalise::normalise;
pub use transcriber::{EndpointingConfig, StreamingTranscriber};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("resampling failed: {0}")]
    Resample(String),
}
