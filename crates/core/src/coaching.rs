//! Coaching suggestions produced by the Coaching Agent Adapter (spec §3, §4.5).

use crate::audio::Codec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed strategy label set (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Delay,
    Empathy,
    InformationExtraction,
    DeEscalation,
    Terminate,
}

/// A coaching utterance, not retained beyond dispatch unless persistence is
/// attached (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachingSuggestion {
    pub text: String,
    pub strategy: Strategy,
    pub intent_label: String,
    pub audio: Option<Vec<u8>>,
    /// Codec of `audio`, set together with it — `None` exactly when `audio`
    /// is `None`. Carried separately because `TextToSpeech::synthesize`
    /// tags its own output codec (spec §6).
    pub audio_codec: Option<Codec>,
    pub created_at: DateTime<Utc>,
}

impl CoachingSuggestion {
    pub fn new(text: impl Into<String>, strategy: Strategy, intent_label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            strategy,
            intent_label: intent_label.into(),
            audio: None,
            audio_codec: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_audio(mut self, codec: Codec, audio: Vec<u8>) -> Self {
        self.audio = Some(audio);
        self.audio_codec = Some(codec);
        self
    }
}
