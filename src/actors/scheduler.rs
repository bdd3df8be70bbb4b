//! Health check scheduler
//!
//! One `ServiceMonitor` task per service, each on its own interval spread by
//! `interval_jitter`. A shared semaphore bounds the number of probe attempts
//! in flight across all services.
//!
//! ## Cycle
//!
//! ```text
//! Idle ─ tick / CheckNow ─► Probing ─┬─ healthy / degraded ─────────────► emit event ─► Idle
//!                              ▲     └─ unhealthy ─ retries left? ─ no ─► emit event ─► Idle
//!                              │                         │ yes
//!                              └──── backoff + jitter ◄──┘
//! ```
//!
//! Every cycle emits exactly one `HealthEvent`. A success within the retry
//! budget hides the earlier failures (transient). The idle wait and the
//! backoff sleep observe shutdown; an attempt in flight finishes first (it is
//! bounded by its timeout).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, instrument, trace, warn};

use super::messages::ServiceCommand;
use crate::backoff::jittered;
use crate::config::{ResolvedServiceConfig, SchedulerConfig};
use crate::model::{HealthCheckResult, HealthEvent, HealthStatus};
use crate::probes::{ProbeFailure, ProbeKind};

/// Resolve once shutdown was requested (or the scheduler is gone)
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Actor that probes a single service
pub struct ServiceMonitor {
    config: ResolvedServiceConfig,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<ServiceCommand>,

    /// Feeds the alert engine
    event_tx: mpsc::Sender<HealthEvent>,

    /// Global bound on attempts in flight
    permits: Arc<Semaphore>,

    shutdown: watch::Receiver<bool>,

    /// Offset of the first tick, spreads services sharing an interval
    initial_delay: Duration,

    /// Each period is the interval spread by up to this ratio
    interval_jitter: f64,
}

impl ServiceMonitor {
    pub fn new(
        config: ResolvedServiceConfig,
        command_rx: mpsc::Receiver<ServiceCommand>,
        event_tx: mpsc::Sender<HealthEvent>,
        permits: Arc<Semaphore>,
        shutdown: watch::Receiver<bool>,
        initial_delay: Duration,
        interval_jitter: f64,
    ) -> Self {
        Self {
            config,
            command_rx,
            event_tx,
            permits,
            shutdown,
            initial_delay,
            interval_jitter,
        }
    }

    /// Deadline of the cycle after one that was due at `due`
    fn next_due(&self, due: Instant) -> Instant {
        let period = jittered(self.config.interval, self.interval_jitter);
        let now = Instant::now();
        // an overrunning cycle pushes the schedule back instead of bursting
        if due + period < now { now + period } else { due + period }
    }

    /// Run the actor's main loop until shutdown
    #[instrument(skip(self), fields(service = %self.config.name))]
    pub async fn run(mut self) {
        debug!("starting service monitor, first probe in {:?}", self.initial_delay);

        let mut due = Instant::now() + self.initial_delay;

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut self.shutdown) => {
                    debug!("received shutdown signal");
                    break;
                }

                // Timer tick - perform a probe cycle
                _ = sleep_until(due) => {
                    if let Some(event) = self.run_cycle().await {
                        self.publish(event).await;
                    }
                    due = self.next_due(due);
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ServiceCommand::CheckNow { respond_to } => {
                            debug!("received CheckNow command");
                            if let Some(event) = self.run_cycle().await {
                                self.publish(event.clone()).await;
                                let _ = respond_to.send(event);
                            }
                        }
                    }
                }
            }
        }

        debug!("service monitor stopped");
    }

    async fn publish(&self, event: HealthEvent) {
        trace!("publishing {} after {} attempt(s)", event.status, event.attempts);
        if self.event_tx.send(event).await.is_err() {
            warn!("alert engine is gone, dropping health event");
        }
    }

    /// Probe with retries; `None` when shutdown interrupted the backoff
    async fn run_cycle(&mut self) -> Option<HealthEvent> {
        let mut attempt = 1;
        loop {
            let result = self.attempt(attempt).await;

            let failed = result.status == HealthStatus::Unhealthy;
            if !failed || attempt > self.config.retries {
                if failed {
                    warn!(
                        "{} unhealthy after {} attempt(s): {}",
                        self.config.name,
                        attempt,
                        result.error.as_deref().unwrap_or("no detail")
                    );
                }
                return Some(HealthEvent::from_result(result, attempt, self.config.tags.clone()));
            }

            let delay = self.config.backoff.delay(attempt);
            debug!("attempt {attempt} failed, retrying in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut self.shutdown) => {
                    debug!("shutdown during backoff, abandoning cycle");
                    return None;
                }
            }
            attempt += 1;
        }
    }

    /// One probe attempt, cancelled at the timeout boundary
    #[instrument(skip(self), fields(service = %self.config.name))]
    async fn attempt(&self, attempt: u32) -> HealthCheckResult {
        // The semaphore is never closed; without a permit the attempt just runs unbounded
        let _permit = self.permits.acquire().await.ok();

        let timestamp = Utc::now();
        let started = Instant::now();
        let outcome = timeout(
            self.config.timeout,
            self.config.probe.probe(&self.config.target, self.config.timeout),
        )
        .await;
        let latency = started.elapsed();

        let (status, error, metadata) = match outcome {
            Ok(Ok(observation)) => {
                let mut status = observation.status;
                let mut detail = observation.detail;
                if let Some(ceiling) = self.config.max_latency {
                    if status == HealthStatus::Healthy && latency > ceiling {
                        status = HealthStatus::Degraded;
                        detail = Some(format!(
                            "latency {}ms exceeds {}ms",
                            latency.as_millis(),
                            ceiling.as_millis()
                        ));
                    }
                }
                (status, detail, observation.metadata)
            }
            Ok(Err(failure)) => {
                trace!("probe failed: {failure}");
                (HealthStatus::Unhealthy, Some(failure.to_string()), BTreeMap::new())
            }
            Err(_) => {
                trace!("probe cancelled after {:?}", self.config.timeout);
                let failure = ProbeFailure::Timeout(self.config.timeout);
                (HealthStatus::Unhealthy, Some(failure.to_string()), BTreeMap::new())
            }
        };

        HealthCheckResult {
            service: self.config.name.clone(),
            kind: self.config.kind.clone(),
            status,
            latency,
            timestamp,
            error,
            metadata,
        }
    }
}

/// What the scheduler exposes about a managed service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub kind: ProbeKind,
    pub target: String,
    pub interval_secs: u64,
    pub timeout_ms: u64,
    pub retries: u32,
}

/// Handle for controlling the scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    monitors: Arc<BTreeMap<String, (ServiceInfo, mpsc::Sender<ServiceCommand>)>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    /// Spawn one monitor per service, staggering their first probes
    pub fn spawn(
        services: Vec<ResolvedServiceConfig>,
        config: SchedulerConfig,
        event_tx: mpsc::Sender<HealthEvent>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_probes.max(1)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let count = services.len().max(1) as u32;

        let mut monitors = BTreeMap::new();
        let mut tasks = Vec::with_capacity(services.len());
        for (index, service) in services.into_iter().enumerate() {
            let window = config
                .stagger_secs
                .map(Duration::from_secs)
                .unwrap_or(service.interval);
            let initial_delay = window * index as u32 / count;

            let info = ServiceInfo {
                name: service.name.clone(),
                kind: service.kind.clone(),
                target: service.target.clone(),
                interval_secs: service.interval.as_secs(),
                timeout_ms: service.timeout.as_millis() as u64,
                retries: service.retries,
            };

            let (cmd_tx, cmd_rx) = mpsc::channel(8);
            let monitor = ServiceMonitor::new(
                service,
                cmd_rx,
                event_tx.clone(),
                permits.clone(),
                shutdown_rx.clone(),
                initial_delay,
                config.interval_jitter,
            );
            tasks.push(tokio::spawn(monitor.run()));
            monitors.insert(info.name.clone(), (info, cmd_tx));
        }

        info!("scheduler started with {} service(s)", monitors.len());

        Self {
            monitors: Arc::new(monitors),
            tasks: Arc::new(Mutex::new(tasks)),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Run a probe cycle for `service` now and return its event
    pub async fn check_now(&self, service: &str) -> Result<HealthEvent> {
        let (_, sender) = self
            .monitors
            .get(service)
            .ok_or_else(|| anyhow!("unknown service '{service}'"))?;

        let (tx, rx) = oneshot::channel();
        sender
            .send(ServiceCommand::CheckNow { respond_to: tx })
            .await
            .context("service monitor stopped")?;

        rx.await.context("check interrupted by shutdown")
    }

    /// Managed services, ordered by name
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.monitors.values().map(|(info, _)| info.clone()).collect()
    }

    /// Stop all monitors and wait for them; in-flight attempts finish first
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("service monitor task failed: {e}");
            }
        }
        debug!("scheduler stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================
