//! Fixed-window rate limiter
//!
//! Used globally by the alert engine (drops excess dispatches) and per channel
//! by the router (throttles deliveries). Increment and window reset happen
//! under one lock, so concurrent callers never over-admit.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    /// Admissions per window
    pub max: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Longest accepted window, one week
pub const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

fn default_window_secs() -> u64 {
    60
}

#[derive(Debug)]
struct Window {
    start: Option<DateTime<Utc>>,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: chrono::Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            max: config.max,
            window: i64::try_from(config.window_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
            state: Mutex::new(Window { start: None, count: 0 }),
        }
    }

    /// Admit one unit at `now`, or tell how long until the window resets
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<(), Duration> {
        let mut window = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let expired = window.start.is_none_or(|start| {
            now < start || start.checked_add_signed(self.window).is_some_and(|end| now >= end)
        });
        if expired {
            window.start = Some(now);
            window.count = 0;
        }

        if window.count < self.max {
            window.count += 1;
            return Ok(());
        }

        let wait = window
            .start
            .and_then(|start| start.checked_add_signed(self.window))
            .map_or(Duration::MAX, |reset_at| (reset_at - now).to_std().unwrap_or_default());
        Err(wait)
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}
