//! Fixed engineering constants that are not meant to be tuned per
//! deployment (spec §5 timeouts).

/// Collaborator call timeouts (spec §5).
pub mod timeouts {
    pub const STT_CALL_MS: u64 = 8_000;
    pub const LLM_EXTRACTION_MS: u64 = 6_000;
    pub const LLM_COACHING_MS: u64 = 6_000;
    pub const TTS_CALL_MS: u64 = 4_000;
    pub const URL_SCAN_MS: u64 = 10_000;
}

/// Streaming transcriber trigger thresholds (spec §4.4).
pub mod transcriber {
    pub const MIN_VOICED_WINDOW_SECONDS: f64 = 3.0;
    pub const ENDPOINT_SILENCE_SECONDS: f64 = 0.8;
    pub const MIN_VOICED_BEFORE_ENDPOINT_SECONDS: f64 = 0.5;
    pub const DISCARD_WINDOW_SECONDS: f64 = 5.0;
    pub const DISCARD_VOICED_FLOOR_SECONDS: f64 = 0.3;
}

/// Backpressure and teardown constants (spec §4.7, §5).
pub mod session {
    pub const SLOW_CONSUMER_BLOCK_SECONDS: u64 = 5;
    pub const TEARDOWN_DRAIN_DEADLINE_MS: u64 = 2_000;
    pub const MAX_MISSED_PONGS: u32 = 3;
}

/// Analysis dispatcher context window and concurrency caps (spec §4.5, §5).
pub mod dispatcher {
    pub const COACHING_CONTEXT_WINDOW: usize = 6;
    pub const MAX_CONCURRENT_EXTRACTIONS_PER_SESSION: usize = 4;
}
