//! Application settings, layered via the `config` crate.

use crate::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Controls how strict settings validation is (ambient deploy concern, not
/// named in spec.md but present in every deploy of the teacher's stack).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Recognised ingress audio codecs (spec §4.3, §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecAllowlist(pub Vec<String>);

impl Default for CodecAllowlist {
    fn default() -> Self {
        CodecAllowlist(vec![
            "webm-opus".to_string(),
            "ogg-opus".to_string(),
            "wav-pcm".to_string(),
            "mp3".to_string(),
        ])
    }
}

/// Top-level settings (spec §6 "Environment / configuration" table, plus
/// the ambient server/observability sections).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub broker: BrokerConfig,
}

/// The broker-specific knobs enumerated in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_egress_queue_capacity")]
    pub egress_queue_capacity: usize,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    #[serde(default = "default_stt_window_seconds")]
    pub stt_window_seconds: f64,

    #[serde(default = "default_endpoint_silence_ms")]
    pub endpoint_silence_ms: u64,

    #[serde(default)]
    pub recording_enabled: bool,

    #[serde(default)]
    pub recording_sink: Option<String>,

    #[serde(default)]
    pub codec_allowlist: CodecAllowlist,
}

fn default_max_sessions() -> usize {
    1024
}
fn default_egress_queue_capacity() -> usize {
    256
}
fn default_ping_interval_ms() -> u64 {
    10_000
}
fn default_drain_grace_ms() -> u64 {
    60_000
}
fn default_stt_window_seconds() -> f64 {
    3.0
}
fn default_endpoint_silence_ms() -> u64 {
    800
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            egress_queue_capacity: default_egress_queue_capacity(),
            ping_interval_ms: default_ping_interval_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            stt_window_seconds: default_stt_window_seconds(),
            endpoint_silence_ms: default_endpoint_silence_ms(),
            recording_enabled: false,
            recording_sink: None,
            codec_allowlist: CodecAllowlist::default(),
        }
    }
}

/// Per-connection rate limiting (ambient abuse-resistance, not a spec
/// feature — SPEC_FULL.md §C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,

    #[serde(default = "default_audio_bytes_per_second")]
    pub audio_bytes_per_second: u32,

    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f32,
}

fn default_true() -> bool {
    true
}
fn default_messages_per_second() -> u32 {
    100
}
fn default_audio_bytes_per_second() -> u32 {
    64_000
}
fn default_burst_multiplier() -> f32 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_second: default_messages_per_second(),
            audio_bytes_per_second: default_audio_bytes_per_second(),
            burst_multiplier: default_burst_multiplier(),
        }
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_connections() -> usize {
    2048
}
fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
            timeout_seconds: default_timeout(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Logging/tracing/metrics configuration (SPEC_FULL.md §B ambient stack).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub tracing_enabled: bool,

    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            tracing_enabled: true,
            otlp_endpoint: None,
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_broker()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if server.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_connections".to_string(),
                message: "Max connections must be at least 1".to_string(),
            });
        }

        if server.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.timeout_seconds".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        Ok(())
    }

    fn validate_broker(&self) -> Result<(), ConfigError> {
        let broker = &self.broker;

        if broker.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broker.max_sessions".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if broker.egress_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broker.egress_queue_capacity".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if broker.stt_window_seconds <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "broker.stt_window_seconds".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        if broker.recording_enabled && broker.recording_sink.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "broker.recording_sink".to_string(),
                message: "recording_enabled requires a recording_sink".to_string(),
            });
        }

        if broker.codec_allowlist.0.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "broker.codec_allowlist".to_string(),
                message: "Must recognise at least one codec".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from `config/default.{yaml,toml}` → `config/{env}.{yaml,toml}`
/// → `CALLBROKER__`-prefixed environment variables, then validate.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("CALLBROKER")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_pass_validation() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn recording_enabled_without_sink_fails_validation() {
        let mut settings = Settings::default();
        settings.broker.recording_enabled = true;
        settings.broker.recording_sink = None;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }
}
