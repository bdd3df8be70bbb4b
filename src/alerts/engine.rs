//! Alert evaluation
//!
//! ## Evaluation Order
//!
//! ```text
//! event ─┬─ healthy ─► resolve open alert ─► resolution dispatches (no cooldown)
//!        │
//!        └─ firing ─► first matching rule ─► open / re-fire alert
//!                       │ none: record only
//!                       ▼
//!                  suppression? ─ yes ─► state Suppressed, no dispatch
//!                       ▼
//!                  cooldown elapsed? ─ no ─► no dispatch
//!                       ▼
//!                  one dispatch per channel passing its severity filter,
//!                  each admitted by the global rate limit, cooldown refreshed
//! ```
//!
//! Suppression is checked before cooldown, so a suppressed event never starts or
//! refreshes a cooldown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use super::rate_limit::RateLimiter;
use super::rules::{AlertRule, select_rule};
use super::store::{Alert, AlertState, AlertStore, FingerprintRecord};
use super::suppression::{SuppressionPolicy, SuppressionReason};
use crate::model::{Fingerprint, HealthEvent, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchKind {
    Firing,
    Resolved,
}

/// A rendered, channel-bound notification request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatch {
    pub id: u64,
    pub channel: String,
    pub kind: DispatchKind,
    pub fingerprint: Fingerprint,
    pub rule: String,
    pub service: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Routing facts the engine needs about a channel
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelRoute {
    pub severity_filter: Option<Severity>,
    pub send_resolved: bool,
}

impl ChannelRoute {
    pub fn accepts(&self, severity: Severity) -> bool {
        self.severity_filter.is_none_or(|floor| severity >= floor)
    }
}

/// Why an alert got resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionCause {
    Recovered,
    Expired,
}

/// Policy outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    /// No rule matched; nothing opened, nothing sent
    Unmatched,
    Suppressed { reason: SuppressionReason },
    CooledDown { until: DateTime<Utc> },
    /// `dispatched` went out, `rate_limited` were dropped by the global limit
    Dispatched { dispatched: usize, rate_limited: usize },
    /// Every channel filtered the alert out by severity
    NoEligibleChannel,
    Resolved { cause: ResolutionCause, dispatched: usize, rate_limited: usize },
    /// Healthy event without an open alert (includes already resolved ones)
    NothingToResolve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub dispatches: Vec<Dispatch>,
}

impl Evaluation {
    fn without_dispatch(outcome: Outcome) -> Self {
        Self {
            outcome,
            dispatches: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EngineStats {
    events: AtomicU64,
    unmatched: AtomicU64,
    dispatched: AtomicU64,
    suppressed: AtomicU64,
    cooled_down: AtomicU64,
    rate_limited: AtomicU64,
    resolved: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub events: u64,
    pub unmatched: u64,
    pub dispatched: u64,
    pub suppressed: u64,
    pub cooled_down: u64,
    pub rate_limited: u64,
    pub resolved: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            cooled_down: self.cooled_down.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

pub struct AlertEngine {
    rules: Vec<AlertRule>,
    channels: HashMap<String, ChannelRoute>,
    suppression: SuppressionPolicy,
    rate_limit: Option<RateLimiter>,
    store: AlertStore,
    stats: EngineStats,
    next_dispatch_id: AtomicU64,
}

impl AlertEngine {
    pub fn new(
        rules: Vec<AlertRule>,
        channels: HashMap<String, ChannelRoute>,
        suppression: SuppressionPolicy,
        rate_limit: Option<RateLimiter>,
    ) -> Self {
        Self {
            rules,
            channels,
            suppression,
            rate_limit,
            store: AlertStore::new(),
            stats: EngineStats::default(),
            next_dispatch_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn suppression(&self) -> &SuppressionPolicy {
        &self.suppression
    }

    /// Evaluate one event at `now`
    ///
    /// Holds the fingerprint's record lock for the whole evaluation, so fire and
    /// resolve for the same fingerprint can never interleave.
    #[instrument(skip(self, event), fields(service = %event.service, fingerprint = %event.fingerprint))]
    pub async fn evaluate(&self, event: &HealthEvent, now: DateTime<Utc>) -> Evaluation {
        bump(&self.stats.events, 1);

        if event.is_recovery() {
            // a recovery never creates a record
            let Some(mut record) = self.store.lock_existing(&event.fingerprint).await else {
                trace!("nothing to resolve");
                return Evaluation::without_dispatch(Outcome::NothingToResolve);
            };
            return self.resolve(&mut record, Some(event), ResolutionCause::Recovered, now);
        }

        let Some(rule) = select_rule(&self.rules, event) else {
            trace!("no rule matched, event recorded only");
            bump(&self.stats.unmatched, 1);
            return Evaluation::without_dispatch(Outcome::Unmatched);
        };
        let mut record = self.store.lock(&event.fingerprint).await;

        let reopen = !record.alert.as_ref().is_some_and(|alert| alert.state.is_open());
        if reopen {
            debug!("opening alert via rule '{}'", rule.name);
            record.alert = Some(Alert::open(event, &rule.name, rule.severity, now));
        }
        let Some(alert) = record.alert.as_mut() else {
            return Evaluation::without_dispatch(Outcome::Unmatched);
        };
        if !reopen {
            alert.refire(event, &rule.name, rule.severity, now);
        }
        alert.message = rule.template.render(event, alert, &rule.name);

        if let Some(reason) = self.suppression.check(event, rule.severity, now) {
            debug!("suppressed: {reason}");
            alert.state = AlertState::Suppressed;
            bump(&self.stats.suppressed, 1);
            return Evaluation::without_dispatch(Outcome::Suppressed { reason });
        }
        alert.state = AlertState::Active;
        let alert = alert.clone();

        if !record.cooldown_elapsed(&rule.name, now) {
            let until = record.next_eligible(&rule.name).unwrap_or(now);
            trace!("cooling down until {until}");
            bump(&self.stats.cooled_down, 1);
            return Evaluation::without_dispatch(Outcome::CooledDown { until });
        }

        let title = format!(
            "[{}] {}: {}",
            alert.severity.as_str().to_uppercase(),
            rule.name,
            alert.service
        );
        let targets = self.eligible_channels(rule, alert.severity, DispatchKind::Firing);
        if targets.is_empty() {
            debug!("no channel accepts severity {}", alert.severity);
            return Evaluation::without_dispatch(Outcome::NoEligibleChannel);
        }

        let (dispatches, rate_limited) =
            self.build_dispatches(&alert, targets, DispatchKind::Firing, &title, &alert.message, now);

        if !dispatches.is_empty() {
            record.start_cooldown(&rule.name, now, rule.cooldown);
            if let Some(alert) = record.alert.as_mut() {
                alert.last_dispatched_at = Some(now);
            }
        }

        info!(
            "alert '{}' dispatched to {} channel(s), {} rate-limited",
            rule.name,
            dispatches.len(),
            rate_limited
        );

        Evaluation {
            outcome: Outcome::Dispatched {
                dispatched: dispatches.len(),
                rate_limited,
            },
            dispatches,
        }
    }

    /// Resolve open alerts that saw no re-fire for `ttl`
    pub async fn expire_stale(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> Vec<Dispatch> {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return Vec::new();
        };

        let mut dispatches = Vec::new();
        for fingerprint in self.store.stale(now - ttl).await {
            let Some(mut record) = self.store.lock_existing(&fingerprint).await else {
                continue;
            };
            // Re-check under the record lock, a re-fire may have raced the scan
            let still_stale = record
                .alert
                .as_ref()
                .is_some_and(|alert| alert.state.is_open() && alert.last_fired_at <= now - ttl);
            if still_stale {
                debug!(%fingerprint, "alert expired without re-fire");
                dispatches.extend(
                    self.resolve(&mut record, None, ResolutionCause::Expired, now)
                        .dispatches,
                );
            }
        }
        dispatches
    }

    /// Forget fingerprints with nothing open and no cooldown left
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let pruned = self.store.prune(now).await;
        if pruned > 0 {
            debug!("pruned {pruned} idle alert record(s)");
        }
        pruned
    }

    fn resolve(
        &self,
        record: &mut FingerprintRecord,
        event: Option<&HealthEvent>,
        cause: ResolutionCause,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let Some(alert) = record.alert.as_mut().filter(|alert| alert.state.is_open()) else {
            trace!("nothing to resolve");
            return Evaluation::without_dispatch(Outcome::NothingToResolve);
        };

        alert.state = AlertState::Resolved;
        alert.resolved_at = Some(now);
        bump(&self.stats.resolved, 1);

        let alert = alert.clone();
        let Some(rule) = self.rules.iter().find(|rule| rule.name == alert.rule) else {
            warn!("alert references unknown rule '{}'", alert.rule);
            return Evaluation::without_dispatch(Outcome::Resolved {
                cause,
                dispatched: 0,
                rate_limited: 0,
            });
        };

        let title = format!("[RESOLVED] {}: {}", rule.name, alert.service);
        let mut message = rule.resolve_template.render_resolution(event, &alert);
        if cause == ResolutionCause::Expired {
            message.push_str(" (expired without re-fire)");
        }

        let targets = self.eligible_channels(rule, alert.severity, DispatchKind::Resolved);
        let (dispatches, rate_limited) =
            self.build_dispatches(&alert, targets, DispatchKind::Resolved, &title, &message, now);

        info!("alert '{}' resolved ({cause:?})", rule.name);

        Evaluation {
            outcome: Outcome::Resolved {
                cause,
                dispatched: dispatches.len(),
                rate_limited,
            },
            dispatches,
        }
    }

    fn eligible_channels<'a>(&self, rule: &'a AlertRule, severity: Severity, kind: DispatchKind) -> Vec<&'a str> {
        rule.channels
            .iter()
            .filter(|name| {
                let route = self.channels.get(name.as_str()).copied().unwrap_or_default();
                route.accepts(severity) && (kind == DispatchKind::Firing || route.send_resolved)
            })
            .map(String::as_str)
            .collect()
    }

    fn build_dispatches(
        &self,
        alert: &Alert,
        targets: Vec<&str>,
        kind: DispatchKind,
        title: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> (Vec<Dispatch>, usize) {
        let mut dispatches = Vec::with_capacity(targets.len());
        let mut rate_limited = 0;

        for channel in targets {
            if let Some(limiter) = &self.rate_limit {
                if limiter.try_acquire(now).is_err() {
                    warn!("global rate limit of {} reached, dropping dispatch to '{channel}'", limiter.max());
                    rate_limited += 1;
                    continue;
                }
            }

            dispatches.push(Dispatch {
                id: self.next_dispatch_id.fetch_add(1, Ordering::Relaxed),
                channel: channel.to_string(),
                kind,
                fingerprint: alert.fingerprint.clone(),
                rule: alert.rule.clone(),
                service: alert.service.clone(),
                severity: alert.severity,
                title: title.to_string(),
                message: message.to_string(),
                created_at: now,
            });
        }

        bump(&self.stats.dispatched, dispatches.len());
        bump(&self.stats.rate_limited, rate_limited);
        (dispatches, rate_limited)
    }
}
