//! Wiring of the whole pipeline
//!
//! [`Monitor::start`] builds the history backend, the alert engine and the
//! three actors from a resolved configuration, and connects them:
//! scheduler → alert actor → router. Everything else (API, binary) talks to
//! the pipeline through a [`Monitor`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::actors::alert::AlertHandle;
use crate::actors::messages::DeliveryReport;
use crate::actors::router::{RouterHandle, RouterStatsSnapshot};
use crate::actors::scheduler::{SchedulerHandle, ServiceInfo};
use crate::alerts::rate_limit::RateLimiter;
use crate::alerts::{Alert, AlertEngine, EngineStatsSnapshot};
use crate::config::ResolvedConfig;
use crate::model::{HealthCheckResult, HealthEvent};
use crate::storage::{MemoryBackend, StorageBackend, StorageStats};

/// Read-only view of the pipeline for presentation
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    /// Latest result per service, ordered by service name
    pub services: Vec<HealthCheckResult>,
    /// Every alert record, most recently fired first
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub services: usize,
    pub open_alerts: usize,
    pub muted: bool,
    pub engine: EngineStatsSnapshot,
    pub router: RouterStatsSnapshot,
    pub storage: StorageStats,
}

#[derive(Clone)]
pub struct Monitor {
    scheduler: SchedulerHandle,
    alerts: AlertHandle,
    router: RouterHandle,
    storage: Arc<dyn StorageBackend>,
    engine: Arc<AlertEngine>,
    event_tx: mpsc::Sender<HealthEvent>,
}

impl Monitor {
    /// Start every actor; must run inside a Tokio runtime
    pub fn start(config: ResolvedConfig) -> Result<Self> {
        let ResolvedConfig {
            scheduler,
            engine,
            services,
            rules,
            channels,
            suppression,
            rate_limit,
            storage,
        } = config;

        let backend: Arc<dyn StorageBackend> = Arc::new(
            MemoryBackend::with_capacity(storage.history_per_service).context("invalid storage configuration")?,
        );

        let routes: HashMap<_, _> = channels.iter().map(|c| (c.name.clone(), c.route())).collect();
        let alert_engine = Arc::new(AlertEngine::new(
            rules,
            routes,
            suppression,
            rate_limit.map(RateLimiter::new),
        ));

        let (event_tx, event_rx) = mpsc::channel(scheduler.event_buffer.max(1));
        let (dispatch_tx, dispatch_rx) = mpsc::channel(engine.dispatch_buffer.max(1));

        // downstream first, so nothing produced upstream finds a closed channel
        let router = RouterHandle::spawn(channels, dispatch_rx)?;
        let alerts = AlertHandle::spawn(alert_engine.clone(), backend.clone(), event_rx, dispatch_tx, engine);
        let scheduler = SchedulerHandle::spawn(services, scheduler, event_tx.clone());

        info!("monitor started");

        Ok(Self {
            scheduler,
            alerts,
            router,
            storage: backend,
            engine: alert_engine,
            event_tx,
        })
    }

    /// Sender for health events from sources other than the scheduler
    pub fn event_sender(&self) -> mpsc::Sender<HealthEvent> {
        self.event_tx.clone()
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            taken_at: Utc::now(),
            services: self.storage.latest().await?,
            alerts: self.alerts.alerts().await,
        })
    }

    pub async fn stats(&self) -> Result<MonitorStats> {
        Ok(MonitorStats {
            services: self.scheduler.services().len(),
            open_alerts: self.engine.store().open_count().await,
            muted: self.alerts.is_muted(),
            engine: self.alerts.stats(),
            router: self.router.stats(),
            storage: self.storage.get_stats().await?,
        })
    }

    pub fn is_muted(&self) -> bool {
        self.alerts.is_muted()
    }

    pub fn services(&self) -> Vec<ServiceInfo> {
        self.scheduler.services()
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub async fn check_now(&self, service: &str) -> Result<HealthEvent> {
        self.scheduler.check_now(service).await
    }

    pub async fn mute(&self, duration: Duration) -> Result<()> {
        self.alerts.mute(duration).await
    }

    pub async fn unmute(&self) -> Result<()> {
        self.alerts.unmute().await
    }

    pub fn delivery_reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.router.subscribe()
    }

    /// Ordered shutdown: scheduler, alert evaluation, deliveries, alert store, storage
    pub async fn shutdown(&self) -> Result<()> {
        debug!("stopping scheduler");
        self.scheduler.shutdown().await;

        debug!("draining alert evaluation");
        self.alerts.shutdown().await?;

        debug!("finishing deliveries");
        self.router.shutdown().await?;

        let dropped = self.engine.store().clear().await;
        debug!("dropped {dropped} alert record(s)");

        if let Err(e) = self.storage.close().await {
            warn!("failed to close storage: {e}");
        }

        info!("monitor stopped");
        Ok(())
    }
}
