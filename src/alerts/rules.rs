//! Alert rules
//!
//! Rules are evaluated in declared order and the first match wins. There is no
//! implicit priority between rules.

use std::time::Duration;

use regex::Regex;

use super::template::Template;
use crate::model::{HealthEvent, HealthStatus, Severity};

/// Compiled match predicate; every configured part must hold
#[derive(Debug, Clone, Default)]
pub struct Condition {
    pub service: Option<Regex>,
    pub signal: Option<String>,
    pub statuses: Option<Vec<HealthStatus>>,
    pub min_severity: Option<Severity>,
    pub tags: Vec<(String, Regex)>,
}

impl Condition {
    pub fn matches(&self, event: &HealthEvent) -> bool {
        if let Some(service) = &self.service {
            if !service.is_match(&event.service) {
                return false;
            }
        }

        if let Some(signal) = &self.signal {
            if signal != &event.signal {
                return false;
            }
        }

        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&event.status) {
                return false;
            }
        }

        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }

        self.tags.iter().all(|(key, pattern)| {
            event
                .tags
                .get(key)
                .is_some_and(|value| pattern.is_match(value))
        })
    }
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub condition: Condition,
    /// Severity assigned to alerts opened by this rule
    pub severity: Severity,
    pub template: Template,
    pub resolve_template: Template,
    /// Target channel names, validated at load time
    pub channels: Vec<String>,
    pub cooldown: Duration,
}

/// First rule (in declared order) whose condition matches
pub fn select_rule<'a>(rules: &'a [AlertRule], event: &HealthEvent) -> Option<&'a AlertRule> {
    rules.iter().find(|rule| rule.condition.matches(event))
}
