//! Transcript entries and the per-leg ordering they must maintain (spec §3,
//! §4.4, §8 property 3).

use crate::ids::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// One finalised utterance from a leg's streaming transcriber.
///
/// Ordered by `started_at`; ties are broken by `seq`, a monotonic counter
/// assigned at construction time (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Role,
    pub text: String,
    pub language: Option<String>,
    pub confidence: f32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub seq: u64,
}

static INSERTION_COUNTER: AtomicU64 = AtomicU64::new(0);

impl TranscriptEntry {
    pub fn new(
        speaker: Role,
        text: impl Into<String>,
        language: Option<String>,
        confidence: f32,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            speaker,
            text: text.into(),
            language,
            confidence,
            started_at,
            ended_at,
            seq: INSERTION_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Eq for TranscriptEntry {}

impl PartialOrd for TranscriptEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TranscriptEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.started_at
            .cmp(&other.started_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}
