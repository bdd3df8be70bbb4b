//! Message templates
//!
//! Templates use `{{ name }}` placeholders. Rendering is a pure function of
//! the event, the alert record and the rule; there is no global context.
//!
//! Known placeholders: `service`, `signal`, `status`, `severity`,
//! `event_severity`, `rule`, `fingerprint`, `error`, `attempts`, `latency_ms`,
//! `timestamp`, `first_fired_at`, `last_fired_at`, `fire_count`, plus the map
//! lookups `tags.<key>`, `dimensions.<key>` and `metadata.<key>`.
//! Missing values render as an empty string.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::store::Alert;
use crate::model::HealthEvent;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_\-]+)?)\s*\}\}").expect("valid placeholder regex"));

const VARIABLES: &[&str] = &[
    "service",
    "signal",
    "status",
    "severity",
    "event_severity",
    "rule",
    "fingerprint",
    "error",
    "attempts",
    "latency_ms",
    "timestamp",
    "first_fired_at",
    "last_fired_at",
    "fire_count",
];

const MAP_PREFIXES: &[&str] = &["tags", "dimensions", "metadata"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    UnknownPlaceholder(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::UnknownPlaceholder(name) => write!(f, "unknown placeholder '{{{{{}}}}}'", name),
        }
    }
}

impl std::error::Error for TemplateError {}

/// A validated message template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
}

impl Template {
    /// Validate every placeholder in `source`
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        for caps in PLACEHOLDER.captures_iter(&source) {
            let name = &caps[1];
            let known = match name.split_once('.') {
                Some((prefix, _)) => MAP_PREFIXES.contains(&prefix),
                None => VARIABLES.contains(&name),
            };
            if !known {
                return Err(TemplateError::UnknownPlaceholder(name.to_string()));
            }
        }
        Ok(Self { source })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn render(&self, event: &HealthEvent, alert: &Alert, rule: &str) -> String {
        self.fill(Some(event), alert, rule)
    }

    /// Render for a resolved alert; `event` is absent when the alert expired
    ///
    /// Event fields fall back to what the alert recorded when it fired.
    pub fn render_resolution(&self, event: Option<&HealthEvent>, alert: &Alert) -> String {
        self.fill(event, alert, &alert.rule)
    }

    fn fill(&self, event: Option<&HealthEvent>, alert: &Alert, rule: &str) -> String {
        PLACEHOLDER
            .replace_all(&self.source, |caps: &Captures| lookup(&caps[1], event, alert, rule))
            .into_owned()
    }
}

fn lookup(name: &str, event: Option<&HealthEvent>, alert: &Alert, rule: &str) -> String {
    if let Some((prefix, key)) = name.split_once('.') {
        let value = match prefix {
            "tags" => event.map_or(&alert.tags, |e| &e.tags).get(key),
            "dimensions" => event.and_then(|e| e.dimensions.get(key)),
            "metadata" => event
                .and_then(|e| e.result.as_ref())
                .and_then(|r| r.metadata.get(key)),
            _ => None,
        };
        return value.cloned().unwrap_or_default();
    }

    match name {
        "service" => alert.service.clone(),
        "signal" => alert.signal.clone(),
        "status" => event.map(|e| e.status.to_string()).unwrap_or_default(),
        "severity" => alert.severity.to_string(),
        "event_severity" => event.map(|e| e.severity.to_string()).unwrap_or_default(),
        "rule" => rule.to_string(),
        "fingerprint" => alert.fingerprint.to_string(),
        "error" => event.and_then(|e| e.error.clone()).unwrap_or_default(),
        "attempts" => event.map(|e| e.attempts.to_string()).unwrap_or_default(),
        "latency_ms" => event
            .and_then(|e| e.result.as_ref())
            .map(|r| r.latency.as_millis().to_string())
            .unwrap_or_default(),
        "timestamp" => event.map_or(alert.last_fired_at, |e| e.timestamp).to_rfc3339(),
        "first_fired_at" => alert.first_fired_at.to_rfc3339(),
        "last_fired_at" => alert.last_fired_at.to_rfc3339(),
        "fire_count" => alert.fire_count.to_string(),
        _ => String::new(),
    }
}
