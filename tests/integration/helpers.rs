//! Helper functions for integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use health_sentinel::{
    alerts::{AlertEngine, rate_limit::RateLimiter},
    backoff::BackoffPolicy,
    config::{Config, ResolvedConfig, ResolvedServiceConfig},
    model::{HealthEvent, HealthStatus, Severity},
    probes::{Observation, Probe, ProbeFailure, ProbeKind, ProbeRegistry},
};
use serde_json::Value;

/// Probe whose health is flipped by the test
#[derive(Default)]
pub struct Switch {
    down: AtomicBool,
    calls: AtomicU32,
}

impl Switch {
    pub fn new(down: bool) -> Arc<Self> {
        Arc::new(Self {
            down: AtomicBool::new(down),
            calls: AtomicU32::new(0),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for Switch {
    async fn probe(&self, _target: &str, _timeout: Duration) -> Result<Observation, ProbeFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(ProbeFailure::Connection("connection refused".to_string()))
        } else {
            Ok(Observation::healthy())
        }
    }
}

/// Probe that never answers on its own
#[derive(Default)]
pub struct Hang {
    calls: AtomicU32,
}

impl Hang {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for Hang {
    async fn probe(&self, _target: &str, _timeout: Duration) -> Result<Observation, ProbeFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Observation::healthy())
    }
}

/// Probe that takes a second and remembers how many ran at once
#[derive(Default)]
pub struct Crowd {
    running: AtomicU32,
    peak: AtomicU32,
}

impl Crowd {
    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for Crowd {
    async fn probe(&self, _target: &str, _timeout: Duration) -> Result<Observation, ProbeFailure> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Observation::healthy())
    }
}

/// Runtime service around a test probe, backoff without jitter
pub fn service(name: &str, probe: Arc<dyn Probe>, timeout: Duration, retries: u32) -> ResolvedServiceConfig {
    ResolvedServiceConfig {
        name: name.to_string(),
        kind: ProbeKind::Custom("test".to_string()),
        target: format!("test://{name}"),
        interval: Duration::from_secs(30),
        timeout,
        retries,
        backoff: BackoffPolicy::fixed(Duration::from_secs(1), 2.0),
        max_latency: None,
        tags: BTreeMap::new(),
        probe,
    }
}

/// Parse and resolve a JSON configuration
pub fn resolve(config: Value, registry: &ProbeRegistry) -> ResolvedConfig {
    let config: Config = serde_json::from_value(config).expect("config should parse");
    config.resolve(registry).expect("config should resolve")
}

/// Alert engine built the way the monitor builds it
pub fn engine(config: ResolvedConfig) -> AlertEngine {
    let routes: HashMap<_, _> = config.channels.iter().map(|c| (c.name.clone(), c.route())).collect();
    AlertEngine::new(
        config.rules,
        routes,
        config.suppression,
        config.rate_limit.map(RateLimiter::new),
    )
}

pub fn down(service: &str) -> HealthEvent {
    HealthEvent::signal(service, "health", HealthStatus::Unhealthy, Severity::Error, BTreeMap::new())
}

pub fn up(service: &str) -> HealthEvent {
    HealthEvent::signal(service, "health", HealthStatus::Healthy, Severity::Info, BTreeMap::new())
}

/// Poll `check` until it holds or `limit` passes
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
