//! Application state shared across every HTTP/WebSocket handler.

use std::sync::Arc;

use callbroker_config::settings::Settings;
use parking_lot::RwLock;

use crate::rate_limit::RateLimiter;
use crate::registry::CallRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<Settings>>,
    pub registry: Arc<CallRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics_handle: Arc<metrics_exporter_prometheus::PrometheusHandle>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        registry: Arc<CallRegistry>,
        metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    ) -> Self {
        let rate_limit_config = settings.server.rate_limit.clone();
        Self {
            settings: Arc::new(RwLock::new(settings)),
            registry,
            rate_limiter: Arc::new(RateLimiter::new(rate_limit_config)),
            metrics_handle: Arc::new(metrics_handle),
        }
    }

    pub fn get_settings(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.settings.read()
    }

    /// Reloads settings from the layered config sources. Broker/server knobs
    /// already baked into running sessions (egress capacity, grace period)
    /// only take effect for calls created after the reload.
    pub fn reload_settings(&self, env: Option<&str>) -> Result<(), String> {
        let new_settings =
            callbroker_config::settings::load_settings(env).map_err(|err| format!("failed to reload settings: {err}"))?;
        *self.settings.write() = new_settings;
        tracing::info!("settings reloaded");
        Ok(())
    }
}
