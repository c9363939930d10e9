//! HTTP speech-to-text collaborator (spec §6 `stt.transcribe`).

use crate::http::{build_client, classify_status, run_cancellable};
use async_trait::async_trait;
use callbroker_config::constants::timeouts;
use callbroker_core::{BrokerError, SpeechToText, TranscriptionResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct HttpSpeechToText {
    client: Client,
    endpoint: String,
}

impl HttpSpeechToText {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BrokerError> {
        Ok(Self {
            client: build_client(Duration::from_millis(timeouts::STT_CALL_MS))?,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    /// Base64-encoded 16kHz mono PCM16 (spec §3 canonical representation).
    pcm16_base64: String,
    language_hint: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
    language: Option<String>,
    confidence: f32,
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(
        &self,
        pcm16: &[u8],
        language_hint: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<TranscriptionResult, BrokerError> {
        use base64::Engine;
        let body = TranscribeRequest {
            pcm16_base64: base64::engine::general_purpose::STANDARD.encode(pcm16),
            language_hint,
        };

        let response = run_cancellable(
            cancel,
            self.client.post(&self.endpoint).json(&body).send(),
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|err| BrokerError::CollaboratorFatal(format!("malformed stt response: {err}")))?;

        Ok(TranscriptionResult {
            text: parsed.text,
            language: parsed.language,
            confidence: parsed.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_client_applies_stt_timeout() {
        let stt = HttpSpeechToText::new("http://localhost:9/stt").unwrap();
        assert_eq!(stt.endpoint, "http://localhost:9/stt");
    }
}
