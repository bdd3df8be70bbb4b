//! API response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actors::router::RouterStatsSnapshot;
use crate::actors::scheduler::ServiceInfo;
use crate::alerts::{Alert, EngineStatsSnapshot};
use crate::model::{HealthCheckResult, HealthStatus};
use crate::storage::{StorageStats, UptimeStats};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage_healthy: bool,
    pub timestamp: String,
}

/// A managed service together with its most recent result
#[derive(Debug, Clone, Serialize)]
pub struct ServiceEntry {
    #[serde(flatten)]
    pub info: ServiceInfo,

    /// `unknown` until the first cycle completed
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_result: Option<HealthCheckResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceEntry>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub service: String,
    pub count: usize,
    pub results: Vec<HealthCheckResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UptimeResponse {
    pub since: String,
    #[serde(flatten)]
    pub stats: UptimeStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
    pub muted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub timestamp: String,
    pub services: usize,
    pub open_alerts: usize,
    pub muted: bool,
    pub engine: EngineStatsSnapshot,
    pub router: RouterStatsSnapshot,
    pub storage: StorageStats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MuteRequest {
    pub duration_secs: u64,
}
