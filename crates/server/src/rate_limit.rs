//! Per-connection rate limiting (ambient abuse-resistance, SPEC_FULL.md §C —
//! not a spec.md feature, but every deployed front door in this stack has
//! one). Token-bucket over two independent dimensions: control-plane message
//! rate and raw audio byte rate, since a scripted attacker could hold
//! messages-per-second low while still flooding audio frames.

use callbroker_config::settings::RateLimitConfig;
use parking_lot::Mutex;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("message rate limit exceeded")]
    MessageRate,

    #[error("audio byte rate limit exceeded")]
    AudioRate,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(refill_per_second: f64, burst_multiplier: f64) -> Self {
        let capacity = refill_per_second * burst_multiplier;
        Self { tokens: capacity, capacity, refill_per_second, last_refill: Instant::now() }
    }

    fn try_consume(&mut self, cost: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);

        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// One rate limiter per connected leg (spec §6 "rate limiting is per
/// connection, not per call" — two legs of the same call get independent
/// budgets).
pub struct RateLimiter {
    enabled: bool,
    messages: Mutex<Bucket>,
    audio_bytes: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            messages: Mutex::new(Bucket::new(config.messages_per_second as f64, config.burst_multiplier as f64)),
            audio_bytes: Mutex::new(Bucket::new(config.audio_bytes_per_second as f64, config.burst_multiplier as f64)),
        }
    }

    pub fn check_message(&self) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }
        if self.messages.lock().try_consume(1.0) {
            Ok(())
        } else {
            Err(RateLimitError::MessageRate)
        }
    }

    pub fn check_audio(&self, bytes: usize) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }
        if self.audio_bytes.lock().try_consume(bytes as f64) {
            Ok(())
        } else {
            Err(RateLimitError::AudioRate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig { enabled: true, messages_per_second: 2, audio_bytes_per_second: 100, burst_multiplier: 1.0 }
    }

    #[test]
    fn exhausts_then_rejects() {
        let limiter = RateLimiter::new(config());
        assert!(limiter.check_message().is_ok());
        assert!(limiter.check_message().is_ok());
        assert!(limiter.check_message().is_err());
    }

    #[test]
    fn disabled_always_allows() {
        let mut cfg = config();
        cfg.enabled = false;
        let limiter = RateLimiter::new(cfg);
        for _ in 0..100 {
            assert!(limiter.check_message().is_ok());
        }
    }

    #[test]
    fn audio_budget_is_independent_of_message_budget() {
        let limiter = RateLimiter::new(config());
        assert!(limiter.check_audio(50).is_ok());
        assert!(limiter.check_message().is_ok());
    }
}
