//! AlertActor - feeds health events through the alert engine
//!
//! ## Topology
//!
//! ```text
//! scheduler / signal sources ─► AlertActor ─ record result ─► StorageBackend
//!                                   │
//!                                   │ fingerprint.shard(N)
//!                      ┌────────────┼────────────┐
//!                      ▼            ▼            ▼
//!                  evaluator 0  evaluator 1 … evaluator N-1 ─► dispatches ─► Router
//! ```
//!
//! Events of one fingerprint always land on the same evaluator, so they are
//! evaluated in arrival order. Different fingerprints evaluate concurrently.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, trace, warn};

use super::messages::AlertCommand;
use crate::alerts::{Alert, AlertEngine, Dispatch, EngineStatsSnapshot};
use crate::config::EngineConfig;
use crate::model::HealthEvent;
use crate::storage::StorageBackend;

/// Actor owning the evaluator shards
pub struct AlertActor {
    engine: Arc<AlertEngine>,
    storage: Arc<dyn StorageBackend>,

    /// Health events from the scheduler and external sources
    event_rx: mpsc::Receiver<HealthEvent>,

    /// Command receiver
    command_rx: mpsc::Receiver<AlertCommand>,

    /// One queue per evaluator
    shards: Vec<mpsc::Sender<HealthEvent>>,
    workers: Vec<JoinHandle<()>>,

    dispatch_tx: mpsc::Sender<Dispatch>,

    /// Alert TTL, no expiry when unset; the sweep still prunes idle records
    ttl: Option<Duration>,
    sweep_interval: Duration,
}

impl AlertActor {
    pub fn new(
        engine: Arc<AlertEngine>,
        storage: Arc<dyn StorageBackend>,
        event_rx: mpsc::Receiver<HealthEvent>,
        command_rx: mpsc::Receiver<AlertCommand>,
        dispatch_tx: mpsc::Sender<Dispatch>,
        config: EngineConfig,
    ) -> Self {
        let mut shards = Vec::with_capacity(config.workers.max(1));
        let mut workers = Vec::with_capacity(config.workers.max(1));
        for shard in 0..config.workers.max(1) {
            let (tx, rx) = mpsc::channel(config.dispatch_buffer.max(1));
            shards.push(tx);
            workers.push(tokio::spawn(evaluate_shard(shard, engine.clone(), rx, dispatch_tx.clone())));
        }

        Self {
            engine,
            storage,
            event_rx,
            command_rx,
            shards,
            workers,
            dispatch_tx,
            ttl: config.alert_ttl_secs.map(Duration::from_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor with {} evaluator(s)", self.shards.len());

        let mut sweep = interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }

                _ = sweep.tick() => {
                    self.expire_stale().await;
                    self.engine.prune(Utc::now()).await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(AlertCommand::Mute { duration }) => {
                            let until = chrono::Duration::from_std(duration)
                                .ok()
                                .and_then(|d| Utc::now().checked_add_signed(d))
                                .unwrap_or(DateTime::<Utc>::MAX_UTC);
                            info!("alerts muted until {until}");
                            self.engine.suppression().mute_until(until);
                        }

                        Some(AlertCommand::Unmute) => {
                            info!("alerts unmuted");
                            self.engine.suppression().unmute();
                        }

                        Some(AlertCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            self.drain().await;
                            let _ = respond_to.send(());
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            self.drain().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("alert actor stopped");
    }

    async fn handle_event(&self, event: HealthEvent) {
        if let Some(result) = &event.result {
            if let Err(e) = self.storage.record(result.clone()).await {
                warn!("failed to record result for {}: {e}", result.service);
            }
        }

        let shard = event.fingerprint.shard(self.shards.len());
        if self.shards[shard].send(event).await.is_err() {
            warn!("evaluator {shard} is gone, dropping event");
        }
    }

    async fn expire_stale(&self) {
        let Some(ttl) = self.ttl else {
            return;
        };

        for dispatch in self.engine.expire_stale(ttl, Utc::now()).await {
            if self.dispatch_tx.send(dispatch).await.is_err() {
                warn!("router is gone, dropping resolution dispatch");
            }
        }
    }

    /// Evaluate everything already queued, then stop the evaluators
    async fn drain(&mut self) {
        self.event_rx.close();
        while let Some(event) = self.event_rx.recv().await {
            self.handle_event(event).await;
        }

        self.shards.clear();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!("evaluator task failed: {e}");
            }
        }
    }
}

#[instrument(skip(engine, events, dispatch_tx))]
async fn evaluate_shard(
    shard: usize,
    engine: Arc<AlertEngine>,
    mut events: mpsc::Receiver<HealthEvent>,
    dispatch_tx: mpsc::Sender<Dispatch>,
) {
    while let Some(event) = events.recv().await {
        let evaluation = engine.evaluate(&event, Utc::now()).await;
        trace!("{}: {:?}", event.service, evaluation.outcome);

        for dispatch in evaluation.dispatches {
            if dispatch_tx.send(dispatch).await.is_err() {
                warn!("router is gone, dropping dispatch");
            }
        }
    }
    trace!("evaluator stopped");
}

/// Handle for controlling the AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
    engine: Arc<AlertEngine>,
}

impl AlertHandle {
    /// Spawn the actor and its evaluators
    pub fn spawn(
        engine: Arc<AlertEngine>,
        storage: Arc<dyn StorageBackend>,
        event_rx: mpsc::Receiver<HealthEvent>,
        dispatch_tx: mpsc::Sender<Dispatch>,
        config: EngineConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = AlertActor::new(engine.clone(), storage, event_rx, cmd_rx, dispatch_tx, config);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            engine,
        }
    }

    /// Suppress all dispatches for `duration`
    pub async fn mute(&self, duration: Duration) -> Result<()> {
        self.sender
            .send(AlertCommand::Mute { duration })
            .await
            .context("alert actor stopped")
    }

    pub async fn unmute(&self) -> Result<()> {
        self.sender
            .send(AlertCommand::Unmute)
            .await
            .context("alert actor stopped")
    }

    /// Current alert records, most recently fired first
    pub async fn alerts(&self) -> Vec<Alert> {
        self.engine.store().alerts().await
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.engine.stats()
    }

    pub fn is_muted(&self) -> bool {
        self.engine.suppression().is_muted(Utc::now())
    }

    /// Evaluate queued events and wait for the evaluators to finish
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::Shutdown { respond_to: tx })
            .await
            .context("alert actor stopped")?;
        rx.await.context("alert actor dropped shutdown acknowledgement")
    }
}
