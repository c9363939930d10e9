//! Prometheus metrics (SPEC_FULL.md ambient observability section). Latency
//! histograms per collaborator kind plus request/error counters, exposed at
//! `/metrics` for scraping.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new().install_recorder().expect("failed to install prometheus recorder")
}

pub fn record_stt_latency(duration: Duration) {
    metrics::histogram!("callbroker_stt_latency_seconds").record(duration.as_secs_f64());
}

pub fn record_llm_latency(stage: &'static str, duration: Duration) {
    metrics::histogram!("callbroker_llm_latency_seconds", "stage" => stage).record(duration.as_secs_f64());
}

pub fn record_tts_latency(duration: Duration) {
    metrics::histogram!("callbroker_tts_latency_seconds").record(duration.as_secs_f64());
}

pub fn record_total_latency(envelope_kind: &'static str, duration: Duration) {
    metrics::histogram!("callbroker_envelope_latency_seconds", "kind" => envelope_kind).record(duration.as_secs_f64());
}

pub fn record_request(route: &'static str) {
    metrics::counter!("callbroker_requests_total", "route" => route).increment(1);
}

pub fn record_error(kind: &'static str) {
    metrics::counter!("callbroker_errors_total", "kind" => kind).increment(1);
}

pub fn record_active_sessions(count: usize) {
    metrics::gauge!("callbroker_active_sessions").set(count as f64);
}

pub async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<crate::state::AppState>,
) -> String {
    state.metrics_handle.render()
}
