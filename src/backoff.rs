//! Exponential backoff with jitter, shared by probe retries and channel deliveries

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Backoff policy as written in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    /// Multiplier applied per further retry
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Upper bound for a single delay
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,

    /// Relative jitter in `[0, 1]`, applied symmetrically around the delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_ms() -> u64 {
    1_000
}

fn default_factor() -> f64 {
    2.0
}

fn default_max_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            factor: default_factor(),
            max_ms: default_max_ms(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffPolicy {
    /// Policy without randomness, mostly useful for deterministic tests
    pub fn fixed(initial: Duration, factor: f64) -> Self {
        Self {
            initial_ms: initial.as_millis() as u64,
            factor,
            max_ms: u64::MAX,
            jitter: 0.0,
        }
    }

    /// Nominal delay before retry number `retry` (1-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.initial_ms as f64 * self.factor.max(1.0).powi(exponent);
        let capped = millis.min(self.max_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry number `retry` (1-based), jitter applied
    pub fn delay(&self, retry: u32) -> Duration {
        jittered(self.base_delay(retry), self.jitter)
    }
}

/// `base` spread uniformly by `±ratio` of itself
pub fn jittered(base: Duration, ratio: f64) -> Duration {
    let ratio = ratio.clamp(0.0, 1.0);
    if ratio == 0.0 || base.is_zero() {
        return base;
    }

    let spread = rand::thread_rng().gen_range(-ratio..=ratio);
    base.mul_f64(1.0 + spread)
}
