//! HTTP URL reputation collaborator (spec §4.6 reputation probe / §6).

use crate::http::{build_client, classify_status, run_cancellable};
use async_trait::async_trait;
use callbroker_config::constants::timeouts;
use callbroker_core::{BrokerError, UrlScanResult, UrlScanner};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct HttpUrlScanner {
    client: Client,
    endpoint: String,
}

impl HttpUrlScanner {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BrokerError> {
        Ok(Self {
            client: build_client(Duration::from_millis(timeouts::URL_SCAN_MS))?,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct ScanRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ScanResponse {
    is_safe: bool,
    risk_score: f32,
    #[serde(default)]
    labels: Vec<String>,
}

#[async_trait]
impl UrlScanner for HttpUrlScanner {
    async fn check(&self, url: &str, cancel: CancellationToken) -> Result<UrlScanResult, BrokerError> {
        let response = run_cancellable(
            cancel,
            self.client.post(&self.endpoint).json(&ScanRequest { url }).send(),
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ScanResponse = response
            .json()
            .await
            .map_err(|err| BrokerError::CollaboratorFatal(format!("malformed url-scan response: {err}")))?;

        Ok(UrlScanResult {
            is_safe: parsed.is_safe,
            risk_score: parsed.risk_score,
            labels: parsed.labels,
        })
    }
}
