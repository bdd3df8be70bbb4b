//! Suppression policy: quiet hours, tag matches, severity floor and manual mute
//!
//! Suppression withholds dispatch but never stops alert bookkeeping; the
//! engine still refreshes `last_fired_at` for suppressed alerts.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

use crate::model::{HealthEvent, Severity};

/// A daily time-of-day window in UTC; `end` before `start` wraps past midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum SuppressionReason {
    QuietHours,
    Tag(String),
    SeverityFloor,
    Muted,
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressionReason::QuietHours => write!(f, "quiet hours"),
            SuppressionReason::Tag(tag) => write!(f, "tag {tag}"),
            SuppressionReason::SeverityFloor => write!(f, "below severity floor"),
            SuppressionReason::Muted => write!(f, "muted"),
        }
    }
}

const NOT_MUTED: i64 = i64::MIN;

#[derive(Debug)]
pub struct SuppressionPolicy {
    quiet_hours: Vec<QuietHours>,
    tags: Vec<(String, String)>,
    severity_floor: Option<Severity>,
    /// Mute deadline as unix millis, `NOT_MUTED` when unset
    muted_until: AtomicI64,
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self::new(vec![], vec![], None)
    }
}

impl SuppressionPolicy {
    pub fn new(quiet_hours: Vec<QuietHours>, tags: Vec<(String, String)>, severity_floor: Option<Severity>) -> Self {
        Self {
            quiet_hours,
            tags,
            severity_floor,
            muted_until: AtomicI64::new(NOT_MUTED),
        }
    }

    /// Mute everything until `deadline`; the mute lifts by itself afterwards
    pub fn mute_until(&self, deadline: DateTime<Utc>) {
        self.muted_until
            .store(deadline.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        self.muted_until.store(NOT_MUTED, Ordering::SeqCst);
    }

    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() < self.muted_until.load(Ordering::SeqCst)
    }

    /// Why `event` (opening an alert of `severity`) must not be dispatched at `now`
    pub fn check(&self, event: &HealthEvent, severity: Severity, now: DateTime<Utc>) -> Option<SuppressionReason> {
        if self.is_muted(now) {
            return Some(SuppressionReason::Muted);
        }

        if self.severity_floor.is_some_and(|floor| severity < floor) {
            return Some(SuppressionReason::SeverityFloor);
        }

        if let Some((key, value)) = self
            .tags
            .iter()
            .find(|(key, value)| event.tags.get(key) == Some(value))
        {
            return Some(SuppressionReason::Tag(format!("{key}={value}")));
        }

        let time = now.time();
        if self.quiet_hours.iter().any(|window| window.contains(time)) {
            return Some(SuppressionReason::QuietHours);
        }

        None
    }
}
