//! Live alert state and cooldown timers
//!
//! The store is the only shared mutable state of the pipeline. Each fingerprint
//! owns one record behind its own mutex: writers for the same fingerprint are
//! serialized, different fingerprints never contend. Record creation goes
//! through the map's write lock, so two concurrent first events for the same
//! fingerprint end up with the same record.
//!
//! Records holding nothing but a resolved alert and expired cooldowns are
//! pruned by [`AlertStore::prune`]. A pruned record is marked retired under its
//! own lock, and [`AlertStore::lock`] retries when it lands on one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::model::{Fingerprint, HealthEvent, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Active,
    Suppressed,
    Resolved,
}

impl AlertState {
    /// Active and suppressed alerts are both "open"
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertState::Resolved)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub fingerprint: Fingerprint,
    pub rule: String,
    pub service: String,
    pub signal: String,
    pub severity: Severity,
    pub message: String,
    pub tags: BTreeMap<String, String>,
    pub state: AlertState,
    pub first_fired_at: DateTime<Utc>,
    pub last_fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_dispatched_at: Option<DateTime<Utc>>,
    pub fire_count: u64,
}

impl Alert {
    /// Open a fresh alert for the first matching event of a fingerprint
    pub fn open(event: &HealthEvent, rule: &str, severity: Severity, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint: event.fingerprint.clone(),
            rule: rule.to_string(),
            service: event.service.clone(),
            signal: event.signal.clone(),
            severity,
            message: String::new(),
            tags: event.tags.clone(),
            state: AlertState::Active,
            first_fired_at: now,
            last_fired_at: now,
            resolved_at: None,
            last_dispatched_at: None,
            fire_count: 1,
        }
    }

    /// Record a re-fire of an open alert
    pub fn refire(&mut self, event: &HealthEvent, rule: &str, severity: Severity, now: DateTime<Utc>) {
        self.rule = rule.to_string();
        self.severity = severity;
        self.tags = event.tags.clone();
        self.last_fired_at = now;
        self.fire_count += 1;
    }
}

/// Everything the store keeps for one fingerprint
#[derive(Debug, Default)]
pub struct FingerprintRecord {
    pub alert: Option<Alert>,
    /// rule name -> next eligible dispatch time
    cooldowns: HashMap<String, DateTime<Utc>>,
    /// Removed from the store; a fresh record replaces it
    retired: bool,
}

impl FingerprintRecord {
    pub fn next_eligible(&self, rule: &str) -> Option<DateTime<Utc>> {
        self.cooldowns.get(rule).copied()
    }

    pub fn cooldown_elapsed(&self, rule: &str, now: DateTime<Utc>) -> bool {
        self.next_eligible(rule).is_none_or(|next| now >= next)
    }

    pub fn start_cooldown(&mut self, rule: &str, now: DateTime<Utc>, cooldown: Duration) {
        let cooldown = chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::MAX);
        let next = now.checked_add_signed(cooldown).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.cooldowns.insert(rule.to_string(), next);
    }

    /// Nothing open and no cooldown still running at `now`
    fn is_disposable(&self, now: DateTime<Utc>) -> bool {
        !self.alert.as_ref().is_some_and(|alert| alert.state.is_open())
            && self.cooldowns.values().all(|next| now >= *next)
    }
}

#[derive(Debug, Default)]
pub struct AlertStore {
    records: RwLock<HashMap<Fingerprint, Arc<Mutex<FingerprintRecord>>>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the record for `fingerprint`, creating it if needed
    pub async fn lock(&self, fingerprint: &Fingerprint) -> OwnedMutexGuard<FingerprintRecord> {
        loop {
            let existing = self.records.read().await.get(fingerprint).cloned();
            let record = match existing {
                Some(record) => record,
                None => self
                    .records
                    .write()
                    .await
                    .entry(fingerprint.clone())
                    .or_default()
                    .clone(),
            };
            let guard = record.lock_owned().await;
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Lock the record for `fingerprint` only if one exists
    pub async fn lock_existing(&self, fingerprint: &Fingerprint) -> Option<OwnedMutexGuard<FingerprintRecord>> {
        let record = self.records.read().await.get(fingerprint).cloned()?;
        let guard = record.lock_owned().await;
        (!guard.retired).then_some(guard)
    }

    /// Drop records with no open alert and no running cooldown; returns how many
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| match record.try_lock() {
            Ok(mut guard) if guard.is_disposable(now) => {
                guard.retired = true;
                false
            }
            // busy records are in use, keep them for the next sweep
            _ => true,
        });
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Alert> {
        let record = self.records.read().await.get(fingerprint).cloned()?;
        let guard = record.lock().await;
        guard.alert.clone()
    }

    /// Snapshot of every alert ever opened (latest lifecycle per fingerprint)
    pub async fn alerts(&self) -> Vec<Alert> {
        let records: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut alerts = Vec::with_capacity(records.len());
        for record in records {
            if let Some(alert) = record.lock().await.alert.clone() {
                alerts.push(alert);
            }
        }
        alerts.sort_by(|a, b| b.last_fired_at.cmp(&a.last_fired_at));
        alerts
    }

    pub async fn open_count(&self) -> usize {
        self.alerts()
            .await
            .iter()
            .filter(|alert| alert.state.is_open())
            .count()
    }

    /// Fingerprints of open alerts without a re-fire since `cutoff`
    pub async fn stale(&self, cutoff: DateTime<Utc>) -> Vec<Fingerprint> {
        self.alerts()
            .await
            .into_iter()
            .filter(|alert| alert.state.is_open() && alert.last_fired_at <= cutoff)
            .map(|alert| alert.fingerprint)
            .collect()
    }

    /// Drop all state, used on shutdown
    pub async fn clear(&self) -> usize {
        let mut records = self.records.write().await;
        let count = records.len();
        records.clear();
        count
    }
}
