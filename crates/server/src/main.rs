//! Live Call Broker server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use callbroker_config::settings::Settings;
use callbroker_core::{IntelligenceSink, SpeechToText, TextGenerator, TextToSpeech, TranscriptSink, UrlScanner};
use callbroker_llm::fakes::{EchoSpeechToText, NoopTextGenerator, SafeUrlScanner, SilentTextToSpeech};
use callbroker_llm::{HttpSpeechToText, HttpTextGenerator, HttpTextToSpeech, HttpUrlScanner};
use callbroker_persistence::{InMemorySink, ScyllaConfig};
use callbroker_pipeline::EndpointingConfig;
use callbroker_server::{create_router, init_metrics, AppState, CallRegistry, Collaborators};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("CALLBROKER_ENV").ok();
    let settings = match callbroker_config::settings::load_settings(env.as_deref()) {
        Ok(settings) => {
            eprintln!("Loaded configuration (env: {})", env.as_deref().unwrap_or("default"));
            settings
        },
        Err(err) => {
            eprintln!("Warning: failed to load config: {err}. Using defaults.");
            Settings::default()
        },
    };

    init_tracing(&settings);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting live call broker");
    tracing::info!(environment = ?settings.environment, "configuration loaded");

    let metrics_handle = init_metrics();
    tracing::info!("initialized Prometheus metrics at /metrics");

    let (transcript_sink, intelligence_sink) = init_persistence(&settings).await;

    let collaborators = Arc::new(Collaborators {
        stt: init_stt(),
        text_generator: init_text_generator(),
        tts: init_tts(),
        url_scanner: init_url_scanner(),
        transcript_sink,
        intelligence_sink,
        coaching_voice_id: std::env::var("COACHING_VOICE_ID").unwrap_or_else(|_| "operator-coach".to_string()),
        egress_queue_capacity: settings.broker.egress_queue_capacity,
        drain_grace_ms: settings.broker.drain_grace_ms,
        recording_dir: settings.broker.recording_enabled.then(|| settings.broker.recording_sink.clone()).flatten(),
        endpointing: EndpointingConfig {
            voiced_window_seconds: settings.broker.stt_window_seconds,
            endpoint_silence_seconds: settings.broker.endpoint_silence_ms as f64 / 1000.0,
        },
    });

    let registry = CallRegistry::new(collaborators);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    let state = AppState::new(settings, registry, metrics_handle);

    let app = create_router(state);

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// STT backend: a reachable `STT_ENDPOINT` wires the real HTTP collaborator;
/// otherwise calls fall back to an echo stub rather than failing to boot.
fn init_stt() -> Arc<dyn SpeechToText> {
    match std::env::var("STT_ENDPOINT") {
        Ok(endpoint) => match HttpSpeechToText::new(endpoint) {
            Ok(stt) => {
                tracing::info!("STT backend wired");
                return Arc::new(stt);
            },
            Err(err) => tracing::warn!(error = %err, "failed to construct STT backend, falling back to echo stub"),
        },
        Err(_) => tracing::info!("STT_ENDPOINT not set, transcription will echo a stub phrase"),
    }
    Arc::new(EchoSpeechToText { text: String::new() })
}

fn init_text_generator() -> Arc<dyn TextGenerator> {
    let extract = std::env::var("LLM_EXTRACT_ENDPOINT");
    let coach = std::env::var("LLM_COACH_ENDPOINT");
    match (extract, coach) {
        (Ok(extract), Ok(coach)) => match HttpTextGenerator::new(extract, coach) {
            Ok(generator) => {
                tracing::info!("entity-extraction and coaching backend wired");
                return Arc::new(generator);
            },
            Err(err) => tracing::warn!(error = %err, "failed to construct text-generation backend, falling back to no-op"),
        },
        _ => tracing::info!("LLM_EXTRACT_ENDPOINT/LLM_COACH_ENDPOINT not set, intelligence and coaching will no-op"),
    }
    Arc::new(NoopTextGenerator)
}

fn init_tts() -> Arc<dyn TextToSpeech> {
    match std::env::var("TTS_ENDPOINT") {
        Ok(endpoint) => match HttpTextToSpeech::new(endpoint) {
            Ok(tts) => {
                tracing::info!("TTS backend wired");
                return Arc::new(tts);
            },
            Err(err) => tracing::warn!(error = %err, "failed to construct TTS backend, falling back to silent audio"),
        },
        Err(_) => tracing::info!("TTS_ENDPOINT not set, coaching audio will be silent"),
    }
    Arc::new(SilentTextToSpeech)
}

fn init_url_scanner() -> Arc<dyn UrlScanner> {
    match std::env::var("URLSCAN_ENDPOINT") {
        Ok(endpoint) => match HttpUrlScanner::new(endpoint) {
            Ok(scanner) => {
                tracing::info!("URL scanner backend wired");
                return Arc::new(scanner);
            },
            Err(err) => tracing::warn!(error = %err, "failed to construct URL scanner, falling back to always-safe"),
        },
        Err(_) => tracing::info!("URLSCAN_ENDPOINT not set, URLs will be reported as safe"),
    }
    Arc::new(SafeUrlScanner)
}

/// ScyllaDB persistence is opt-in: if `SCYLLA_HOSTS` is set, connect and use
/// it for both sinks; otherwise fall back to the in-memory sink (the same
/// instance backing both traits, per its own doc comment).
async fn init_persistence(_settings: &Settings) -> (Arc<dyn TranscriptSink>, Arc<dyn IntelligenceSink>) {
    if std::env::var("SCYLLA_HOSTS").is_err() {
        tracing::info!("SCYLLA_HOSTS not set, using in-memory transcript/intelligence sinks");
        let sink = InMemorySink::new();
        return (sink.clone(), sink);
    }

    let config = ScyllaConfig::default();
    match callbroker_persistence::connect(config.clone()).await {
        Ok((transcript, intelligence)) => {
            tracing::info!(hosts = ?config.hosts, keyspace = %config.keyspace, "ScyllaDB persistence initialized");
            (Arc::new(transcript), Arc::new(intelligence))
        },
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize ScyllaDB, falling back to in-memory sinks");
            let sink = InMemorySink::new();
            (sink.clone(), sink)
        },
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, initiating graceful shutdown"),
    }
}

#[cfg(feature = "telemetry")]
fn init_tracing(settings: &Settings) {
    use opentelemetry_otlp::WithExportConfig;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("callbroker={},tower_http=debug", settings.observability.log_level).into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    if let (Some(otlp_endpoint), true) = (&settings.observability.otlp_endpoint, settings.observability.tracing_enabled) {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(otlp_endpoint))
            .with_trace_config(opentelemetry_sdk::trace::Config::default().with_resource(opentelemetry_sdk::Resource::new(vec![
                opentelemetry::KeyValue::new("service.name", "live-call-broker"),
                opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => {
                let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
                subscriber.with(fmt_layer).with(otel_layer).init();
                tracing::info!(endpoint = %otlp_endpoint, "OpenTelemetry tracing enabled");
                return;
            },
            Err(err) => eprintln!("Failed to initialize OpenTelemetry: {err}. Falling back to console logging."),
        }
    }
    subscriber.with(fmt_layer).init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("callbroker={},tower_http=debug", settings.observability.log_level).into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
