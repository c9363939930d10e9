//! HTTP text-to-speech collaborator (spec §6 `tts.synthesize`). The broker
//! passes the returned bytes through unchanged and tags the codec the
//! backend reports — never transcodes (spec §6).

use crate::http::{build_client, classify_status, run_cancellable};
use async_trait::async_trait;
use callbroker_config::constants::timeouts;
use callbroker_core::{BrokerError, Codec, SynthesizedAudio, TextToSpeech};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct HttpTextToSpeech {
    client: Client,
    endpoint: String,
}

impl HttpTextToSpeech {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BrokerError> {
        Ok(Self {
            client: build_client(Duration::from_millis(timeouts::TTS_CALL_MS))?,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
}

#[async_trait]
impl TextToSpeech for HttpTextToSpeech {
    async fn synthesize(&self, text: &str, voice_id: &str, cancel: CancellationToken) -> Result<SynthesizedAudio, BrokerError> {
        let response = run_cancellable(
            cancel,
            self.client
                .post(&self.endpoint)
                .json(&SynthesizeRequest { text, voice_id })
                .send(),
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let codec = response
            .headers()
            .get("x-audio-codec")
            .and_then(|value| value.to_str().ok())
            .and_then(Codec::parse)
            .ok_or_else(|| BrokerError::CollaboratorFatal("tts response missing x-audio-codec header".to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(crate::http::classify_transport_error)?
            .to_vec();

        Ok(SynthesizedAudio { codec, bytes })
    }
}
