//! The closed error-kind taxonomy from spec §7, shared by every crate in the
//! workspace. `callbroker-server` maps these onto HTTP/WS close codes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed envelope, unknown kind, bad base64, unsupported codec.
    /// Surfaced to the sender as an `error` envelope; the leg stays alive.
    /// `code` is the literal wire code (spec §4.2 names `UnknownEnvelope` and
    /// `UnsupportedCodec` explicitly); constructors other than
    /// `unknown_envelope`/`unsupported_codec` fall back to the category name.
    #[error("client protocol violation: {message}")]
    ClientProtocol { code: &'static str, message: String },

    /// A leg for that role is already attached. Terminal for the attempt.
    #[error("role already occupied for this call")]
    RoleOccupied,

    /// Egress queue for a leg has been blocked past the sustained-block
    /// deadline (§5). The leg transitions to `Draining`.
    #[error("consumer too slow to keep up")]
    SlowConsumer,

    /// STT/LLM/TTS timeout or 5xx. Retried once upstream before this is
    /// raised a second time, at which point the affected envelope is dropped.
    #[error("collaborator call failed transiently: {0}")]
    CollaboratorTransient(String),

    /// Bad schema, authentication failure. The owning lane is disabled for
    /// the remainder of the session; audio relay keeps working.
    #[error("collaborator call failed fatally: {0}")]
    CollaboratorFatal(String),

    /// A broken invariant (e.g. two legs for the same role observed inside
    /// the session's own serialisation point). Ends the session.
    #[error("internal invariant violation (correlation_id={correlation_id}): {message}")]
    InternalInvariantViolation {
        correlation_id: String,
        message: String,
    },
}

impl BrokerError {
    /// The wire `code` string used on `error` envelopes (§4.2, §7).
    pub fn wire_code(&self) -> &'static str {
        match self {
            BrokerError::ClientProtocol { code, .. } => code,
            BrokerError::RoleOccupied => "RoleOccupied",
            BrokerError::SlowConsumer => "SlowConsumer",
            BrokerError::CollaboratorTransient(_) => "CollaboratorTransient",
            BrokerError::CollaboratorFatal(_) => "CollaboratorFatal",
            BrokerError::InternalInvariantViolation { .. } => "InternalInvariantViolation",
        }
    }

    pub fn unknown_envelope(kind: impl Into<String>) -> Self {
        BrokerError::ClientProtocol {
            code: "UnknownEnvelope",
            message: format!("unknown envelope kind: {}", kind.into()),
        }
    }

    pub fn unsupported_codec(codec: impl Into<String>) -> Self {
        BrokerError::ClientProtocol {
            code: "UnsupportedCodec",
            message: format!("unsupported codec: {}", codec.into()),
        }
    }

    /// Generic client-protocol violation (malformed envelope, rate limit,
    /// unexpected ingress kind) that spec §4.2 doesn't assign its own
    /// literal wire code — these keep the category name.
    pub fn client_protocol(message: impl Into<String>) -> Self {
        BrokerError::ClientProtocol {
            code: "ClientProtocol",
            message: message.into(),
        }
    }

    pub fn internal_invariant(message: impl Into<String>) -> Self {
        BrokerError::InternalInvariantViolation {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_envelope_reports_the_literal_wire_code() {
        assert_eq!(BrokerError::unknown_envelope("bogus").wire_code(), "UnknownEnvelope");
    }

    #[test]
    fn unsupported_codec_reports_the_literal_wire_code() {
        assert_eq!(BrokerError::unsupported_codec("flac").wire_code(), "UnsupportedCodec");
    }

    #[test]
    fn other_client_protocol_violations_keep_the_category_code() {
        assert_eq!(BrokerError::client_protocol("rate limit exceeded").wire_code(), "ClientProtocol");
    }
}
