//! The duplex-stream wire schema (spec §4.2, §6). A closed, kind-tagged enum
//! so handling it is exhaustive at compile time — the systems-language
//! answer to "mixing control and data on one stream via a kind-tagged JSON
//! object" (spec §9).

use crate::ids::Role;
use crate::intelligence::{Entity, IntelligenceSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::Codec;
use crate::coaching::Strategy;

/// One framed message on the duplex stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Audio {
        codec: Codec,
        #[serde(with = "base64_payload")]
        payload: Vec<u8>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        seq: Option<u64>,
        /// Egress only: which leg this audio relayed from.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        from: Option<Role>,
    },
    Transcript {
        speaker: Role,
        text: String,
        language: Option<String>,
        confidence: f32,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },
    Coaching {
        text: String,
        strategy: Strategy,
        intent: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        audio: Option<AudioPayload>,
        updated_snapshot: IntelligenceSnapshot,
    },
    Intelligence {
        entities_delta: Vec<Entity>,
        tactics_delta: Vec<String>,
        threat_score: f32,
    },
    Ping,
    Pong,
    /// Emitted on the first leg's attach (§4.7 state table).
    Connected,
    PeerJoined {
        role: Role,
    },
    PeerLeft {
        role: Role,
    },
    /// Ingress only: participant-initiated teardown request.
    End,
    CallEnded {
        reason: String,
        duration_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// TTS output attached to a coaching envelope. Kept as a top-level optional
/// field rather than nested (spec §9 Open Question, resolved in SPEC_FULL.md §D.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPayload {
    pub codec: Codec,
    #[serde(with = "base64_payload")]
    pub bytes: Vec<u8>,
}

mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_envelope_round_trips_through_json() {
        let envelope = Envelope::Audio {
            codec: Codec::WebmOpus,
            payload: vec![1, 2, 3, 4],
            seq: Some(7),
            from: Some(Role::Scammer),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"kind\":\"audio\""));
        assert!(json.contains("\"payload\":\""));

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        match parsed {
            Envelope::Audio { payload, seq, .. } => {
                assert_eq!(payload, vec![1, 2, 3, 4]);
                assert_eq!(seq, Some(7));
            },
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let raw = r#"{"kind":"frobnicate"}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }

    #[test]
    fn ping_has_no_extra_fields() {
        let json = serde_json::to_string(&Envelope::Ping).unwrap();
        assert_eq!(json, r#"{"kind":"ping"}"#);
    }
}
