//! In-memory storage backend (no persistence)
//!
//! Results live in a ring buffer per service. When a buffer is full, the
//! oldest result is evicted.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: Ring buffer size is fixed

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{BackendHealth, StorageBackend, StorageStats, UptimeStats};
use super::error::{StorageError, StorageResult};
use crate::model::{HealthCheckResult, HealthStatus};

/// Results kept per service unless configured otherwise
pub const DEFAULT_CAPACITY: usize = 100;

pub struct MemoryBackend {
    /// Results grouped by service name, oldest first
    results: RwLock<HashMap<String, VecDeque<HealthCheckResult>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
            capacity: DEFAULT_CAPACITY,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_capacity(capacity: usize) -> StorageResult<Self> {
        if capacity == 0 {
            return Err(StorageError::InvalidConfig(
                "history_per_service must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            ..Self::new()
        })
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn record(&self, result: HealthCheckResult) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }

        let mut results = self.results.write().await;
        let buffer = results
            .entry(result.service.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(result);
        Ok(())
    }

    async fn latest(&self) -> StorageResult<Vec<HealthCheckResult>> {
        let results = self.results.read().await;
        let mut latest: Vec<_> = results.values().filter_map(|buffer| buffer.back().cloned()).collect();
        latest.sort_by(|a, b| a.service.cmp(&b.service));
        Ok(latest)
    }

    async fn history(&self, service: &str, limit: usize) -> StorageResult<Vec<HealthCheckResult>> {
        debug!("querying latest {} results for {}", limit, service);

        let history = self
            .results
            .read()
            .await
            .get(service)
            .map(|buffer| buffer.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();

        Ok(history)
    }

    async fn uptime(&self, service: &str, since: DateTime<Utc>) -> StorageResult<UptimeStats> {
        let results = self.results.read().await;
        let window: Vec<&HealthCheckResult> = results
            .get(service)
            .map(|buffer| buffer.iter().filter(|r| r.timestamp >= since).collect())
            .unwrap_or_default();

        let count = |status: HealthStatus| window.iter().filter(|r| r.status == status).count();
        let total_checks = window.len();
        let healthy_checks = count(HealthStatus::Healthy);
        let latency_sum: f64 = window.iter().map(|r| r.latency.as_millis() as f64).sum();

        Ok(UptimeStats {
            service: service.to_string(),
            total_checks,
            healthy_checks,
            degraded_checks: count(HealthStatus::Degraded),
            unhealthy_checks: count(HealthStatus::Unhealthy),
            uptime_percentage: (total_checks > 0).then(|| healthy_checks as f64 / total_checks as f64 * 100.0),
            avg_latency_ms: (total_checks > 0).then(|| latency_sum / total_checks as f64),
        })
    }

    async fn health_check(&self) -> StorageResult<BackendHealth> {
        let stats = self.get_stats().await?;
        let closed = self.closed.load(Ordering::SeqCst);
        Ok(BackendHealth {
            healthy: !closed,
            message: if closed {
                "In-memory storage closed".to_string()
            } else {
                "In-memory storage operational".to_string()
            },
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_results".to_string(), stats.results.to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<StorageStats> {
        let results = self.results.read().await;
        Ok(StorageStats {
            backend: "memory",
            services: results.len(),
            results: results.values().map(VecDeque::len).sum(),
            capacity_per_service: self.capacity,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
