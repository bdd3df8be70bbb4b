//! Core value types shared by the probe, scheduler and alerting stages
//!
//! Everything in here is an immutable value passed between pipeline stages.
//! Mutable alert state lives exclusively in [`crate::alerts::store::AlertStore`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::probes::ProbeKind;

/// Signal kind used for events promoted from health check results
pub const HEALTH_SIGNAL: &str = "health";

/// Externally visible health vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Severity an event of this status carries when no source overrides it
    pub fn default_severity(&self) -> Severity {
        match self {
            HealthStatus::Healthy => Severity::Info,
            HealthStatus::Degraded | HealthStatus::Unknown => Severity::Warning,
            HealthStatus::Unhealthy => Severity::Error,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single probe attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub service: String,
    pub kind: ProbeKind,
    pub status: HealthStatus,
    /// Wall time of the attempt
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Stable identity of "the same underlying condition"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the identifying parts of a signal
    ///
    /// Dimensions are iterated in key order, so insertion order never matters.
    pub fn compute(service: &str, signal: &str, dimensions: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(service.as_bytes());
        hasher.update([0x1f]);
        hasher.update(signal.as_bytes());
        for (key, value) in dimensions {
            hasher.update([0x1e]);
            hasher.update(key.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value.as_bytes());
        }
        let digest = hasher.finalize();
        Fingerprint(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Spread fingerprints over `buckets` evaluator shards
    pub fn shard(&self, buckets: usize) -> usize {
        let prefix = self.0.get(..16).unwrap_or(&self.0);
        let value = u64::from_str_radix(prefix, 16).unwrap_or_default();
        (value % buckets.max(1) as u64) as usize
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signal handed to the alert engine
///
/// Most events are promoted health check results, but any source may build one
/// through [`HealthEvent::signal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub fingerprint: Fingerprint,
    pub service: String,
    pub signal: String,
    pub status: HealthStatus,
    pub severity: Severity,
    /// Key dimensions, part of the fingerprint
    pub dimensions: BTreeMap<String, String>,
    /// Free-form tags for rule matching and suppression (not fingerprinted)
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    /// Number of probe attempts that produced this event (1 for external signals)
    pub attempts: u32,
    pub result: Option<HealthCheckResult>,
}

impl HealthEvent {
    /// Promote a finished probe cycle into an engine event
    pub fn from_result(result: HealthCheckResult, attempts: u32, tags: BTreeMap<String, String>) -> Self {
        let dimensions = BTreeMap::new();
        let mut tags = tags;
        tags.entry("probe".to_string())
            .or_insert_with(|| result.kind.name().to_string());

        Self {
            fingerprint: Fingerprint::compute(&result.service, HEALTH_SIGNAL, &dimensions),
            service: result.service.clone(),
            signal: HEALTH_SIGNAL.to_string(),
            status: result.status,
            severity: result.status.default_severity(),
            dimensions,
            tags,
            timestamp: result.timestamp,
            error: result.error.clone(),
            attempts,
            result: Some(result),
        }
    }

    /// Build an event for a non-probe signal source
    pub fn signal(
        service: impl Into<String>,
        signal: impl Into<String>,
        status: HealthStatus,
        severity: Severity,
        dimensions: BTreeMap<String, String>,
    ) -> Self {
        let service = service.into();
        let signal = signal.into();
        Self {
            fingerprint: Fingerprint::compute(&service, &signal, &dimensions),
            service,
            signal,
            status,
            severity,
            dimensions,
            tags: BTreeMap::new(),
            timestamp: Utc::now(),
            error: None,
            attempts: 1,
            result: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// A healthy event resolves whatever fired for the same fingerprint
    pub fn is_recovery(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Serialize durations as integer milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
