//! Storage backend trait definition

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::StorageResult;
use crate::model::HealthCheckResult;

/// Health of the storage backend itself
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub backend: &'static str,
    pub services: usize,
    pub results: usize,
    pub capacity_per_service: usize,
}

/// Availability of one service over the retained history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UptimeStats {
    pub service: String,
    pub total_checks: usize,
    pub healthy_checks: usize,
    pub degraded_checks: usize,
    pub unhealthy_checks: usize,
    /// healthy / total * 100, `None` without any check
    pub uptime_percentage: Option<f64>,
    pub avg_latency_ms: Option<f64>,
}

/// Trait for result history backends
///
/// Implementations must be `Send + Sync` as they are shared between the alert
/// actor (writer) and the snapshot API (readers).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append one probe cycle result
    async fn record(&self, result: HealthCheckResult) -> StorageResult<()>;

    /// Most recent result per service, ordered by service name
    async fn latest(&self) -> StorageResult<Vec<HealthCheckResult>>;

    /// Up to `limit` most recent results of `service`, newest first
    async fn history(&self, service: &str, limit: usize) -> StorageResult<Vec<HealthCheckResult>>;

    /// Uptime statistics over the retained results since `since`
    ///
    /// Uptime % = (healthy checks / total checks) × 100
    async fn uptime(&self, service: &str, since: DateTime<Utc>) -> StorageResult<UptimeStats>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<BackendHealth>;

    async fn get_stats(&self) -> StorageResult<StorageStats>;

    /// Close the backend; further writes fail with [`super::StorageError::Closed`]
    async fn close(&self) -> StorageResult<()>;
}
