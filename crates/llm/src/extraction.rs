//! HTTP model-assisted text generation collaborator (spec §6
//! `llm.extract_entities`/`llm.coach`): one HTTP backend serves both calls,
//! matching `callbroker_core::TextGenerator`'s single-trait shape for
//! "submit text(s), get structured/text output".
//!
//! The extraction response is schema-validated (spec §4.6 "Stage B"); a
//! response that fails validation is logged and discarded rather than
//! surfaced as a hard error, so a malformed model response degrades to
//! stage A's deterministic result instead of dropping the whole pass.

use crate::http::{build_client, classify_status, run_cancellable};
use async_trait::async_trait;
use callbroker_config::constants::timeouts;
use callbroker_core::{
    BrokerError, CoachPlan, Entity, EntityKind, ExtractionResult, Strategy, TextGenerator, TranscriptEntry,
};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static EXTRACTION_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema: Value = serde_json::from_str(
        r#"{
            "type": "object",
            "required": ["entities"],
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["kind", "value", "confidence"],
                        "properties": {
                            "kind": {
                                "type": "string",
                                "enum": ["phone", "url", "upi_handle", "bank_account", "ifsc_code", "email", "keyword"]
                            },
                            "value": {"type": "string"},
                            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                        }
                    }
                }
            }
        }"#,
    )
    .expect("embedded extraction schema is valid json");
    JSONSchema::compile(&schema).expect("embedded extraction schema compiles")
});

pub struct HttpTextGenerator {
    client: Client,
    coach_client: Client,
    extract_endpoint: String,
    coach_endpoint: String,
}

impl HttpTextGenerator {
    pub fn new(extract_endpoint: impl Into<String>, coach_endpoint: impl Into<String>) -> Result<Self, BrokerError> {
        Ok(Self {
            client: build_client(Duration::from_millis(timeouts::LLM_EXTRACTION_MS))?,
            coach_client: build_client(Duration::from_millis(timeouts::LLM_COACHING_MS))?,
            extract_endpoint: extract_endpoint.into(),
            coach_endpoint: coach_endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct RawEntity {
    kind: String,
    value: String,
    confidence: f32,
}

fn parse_entity_kind(kind: &str) -> Option<EntityKind> {
    match kind {
        "phone" => Some(EntityKind::Phone),
        "url" => Some(EntityKind::Url),
        "upi_handle" => Some(EntityKind::UpiHandle),
        "bank_account" => Some(EntityKind::BankAccount),
        "ifsc_code" => Some(EntityKind::IfscCode),
        "email" => Some(EntityKind::Email),
        "keyword" => Some(EntityKind::Keyword),
        _ => None,
    }
}

#[derive(Serialize)]
struct CoachRequest<'a> {
    context_window: Vec<CoachTurn<'a>>,
}

#[derive(Serialize)]
struct CoachTurn<'a> {
    speaker: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct CoachResponse {
    text: String,
    strategy: String,
    intent: String,
}

fn parse_strategy(strategy: &str) -> Strategy {
    match strategy {
        "empathy" => Strategy::Empathy,
        "information_extraction" => Strategy::InformationExtraction,
        "de_escalation" => Strategy::DeEscalation,
        "terminate" => Strategy::Terminate,
        _ => Strategy::Delay,
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn extract_entities(&self, text: &str, cancel: CancellationToken) -> Result<ExtractionResult, BrokerError> {
        let response = run_cancellable(
            cancel,
            self.client
                .post(&self.extract_endpoint)
                .json(&ExtractRequest { text })
                .send(),
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| BrokerError::CollaboratorFatal(format!("malformed extraction response: {err}")))?;

        if EXTRACTION_SCHEMA.validate(&body).is_err() {
            tracing::warn!("stage B extraction response failed schema validation, discarding");
            return Ok(ExtractionResult::default());
        }

        let raw: RawExtraction = serde_json::from_value(body)
            .map_err(|err| BrokerError::CollaboratorFatal(format!("extraction response shape mismatch: {err}")))?;

        let entities = raw
            .entities
            .into_iter()
            .filter_map(|e| parse_entity_kind(&e.kind).map(|kind| Entity::new(kind, e.value, e.confidence)))
            .collect();

        Ok(ExtractionResult { entities })
    }

    async fn coach(&self, context_window: &[TranscriptEntry], cancel: CancellationToken) -> Result<CoachPlan, BrokerError> {
        let turns = context_window
            .iter()
            .map(|entry| CoachTurn {
                speaker: entry.speaker.as_str(),
                text: &entry.text,
            })
            .collect();

        let response = run_cancellable(
            cancel,
            self.coach_client
                .post(&self.coach_endpoint)
                .json(&CoachRequest { context_window: turns })
                .send(),
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: CoachResponse = response
            .json()
            .await
            .map_err(|err| BrokerError::CollaboratorFatal(format!("malformed coaching response: {err}")))?;

        Ok(CoachPlan {
            text: parsed.text,
            strategy: parse_strategy(&parsed.strategy),
            intent: parsed.intent,
        })
    }
}

#[derive(Deserialize)]
struct RawExtraction {
    entities: Vec<RawEntity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_accepts_well_formed_extraction_payload() {
        let payload: Value = serde_json::from_str(
            r#"{"entities": [{"kind": "phone", "value": "919876543210", "confidence": 0.9}]}"#,
        )
        .unwrap();
        assert!(EXTRACTION_SCHEMA.validate(&payload).is_ok());
    }

    #[test]
    fn schema_rejects_unknown_entity_kind() {
        let payload: Value =
            serde_json::from_str(r#"{"entities": [{"kind": "ssn", "value": "x", "confidence": 0.9}]}"#).unwrap();
        assert!(EXTRACTION_SCHEMA.validate(&payload).is_err());
    }

    #[test]
    fn parse_entity_kind_rejects_unknown_strings() {
        assert!(parse_entity_kind("ssn").is_none());
        assert_eq!(parse_entity_kind("otp".trim()), None);
        assert_eq!(parse_entity_kind("keyword"), Some(EntityKind::Keyword));
    }

    #[test]
    fn parse_strategy_defaults_to_delay_for_unknown_values() {
        assert_eq!(parse_strategy("unknown"), Strategy::Delay);
        assert_eq!(parse_strategy("terminate"), Strategy::Terminate);
    }
}
