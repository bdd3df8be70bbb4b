//! RouterActor - delivers dispatches through their channels
//!
//! Every accepted dispatch becomes its own delivery task, so a slow or failing
//! channel never holds up another channel (or another dispatch for the same
//! alert). A delivery task:
//!
//! 1. waits for the channel's rate limiter, if any
//! 2. calls the notifier, bounded by the channel timeout
//! 3. retries retryable failures with the channel's backoff
//! 4. publishes a [`DeliveryReport`] and bumps the counters
//!
//! On shutdown the actor stops accepting, picks up whatever is already queued,
//! and waits for every delivery task to finish or exhaust its retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use super::messages::{DeliveryOutcome, DeliveryReport, RouterCommand};
use crate::alerts::Dispatch;
use crate::alerts::rate_limit::RateLimiter;
use crate::notify::{Channel, DeliveryFailure, Notifier, build_notifier};

/// Shortest pause while waiting for a throttled channel
const MIN_THROTTLE_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub struct RouterStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    throttled: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStatsSnapshot {
    pub delivered: u64,
    pub failed: u64,
    pub retries: u64,
    /// Deliveries that had to wait for a channel rate limit
    pub throttled: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}

struct RoutedChannel {
    channel: Channel,
    notifier: Arc<dyn Notifier>,
    limiter: Option<RateLimiter>,
}

pub struct RouterActor {
    channels: HashMap<String, Arc<RoutedChannel>>,

    dispatch_rx: mpsc::Receiver<Dispatch>,
    command_rx: mpsc::Receiver<RouterCommand>,

    inflight: JoinSet<()>,
    stats: Arc<RouterStats>,
    report_tx: broadcast::Sender<DeliveryReport>,
}

impl RouterActor {
    fn new(
        channels: HashMap<String, Arc<RoutedChannel>>,
        dispatch_rx: mpsc::Receiver<Dispatch>,
        command_rx: mpsc::Receiver<RouterCommand>,
        stats: Arc<RouterStats>,
        report_tx: broadcast::Sender<DeliveryReport>,
    ) -> Self {
        Self {
            channels,
            dispatch_rx,
            command_rx,
            inflight: JoinSet::new(),
            stats,
            report_tx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting router with {} channel(s)", self.channels.len());

        let mut accepting = true;
        loop {
            tokio::select! {
                dispatch = self.dispatch_rx.recv(), if accepting => {
                    match dispatch {
                        Some(dispatch) => self.accept(dispatch),
                        None => {
                            // every producer is gone, nothing new can arrive
                            debug!("dispatch channel closed");
                            accepting = false;
                        }
                    }
                }

                Some(joined) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    if let Err(e) = joined {
                        error!("delivery task failed: {e}");
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(RouterCommand::Shutdown { respond_to }) => {
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

        debug!("router stopped");
    }

    fn accept(&mut self, dispatch: Dispatch) {
        let Some(routed) = self.channels.get(&dispatch.channel).cloned() else {
            // resolve() rejects rules naming unknown channels, so only
            // hand-built dispatches get here
            warn!("dispatch {} names unknown channel '{}'", dispatch.id, dispatch.channel);
            let failure = DeliveryFailure::Misconfigured(format!("unknown channel '{}'", dispatch.channel));
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            publish(&self.report_tx, &dispatch, DeliveryOutcome::Failed {
                attempts: 0,
                error: failure.to_string(),
            });
            return;
        };

        self.inflight
            .spawn(deliver(routed, dispatch, self.stats.clone(), self.report_tx.clone()));
    }

    async fn drain(&mut self) {
        self.dispatch_rx.close();
        while let Some(dispatch) = self.dispatch_rx.recv().await {
            self.accept(dispatch);
        }

        if !self.inflight.is_empty() {
            info!("waiting for {} delivery task(s)", self.inflight.len());
        }
        while let Some(joined) = self.inflight.join_next().await {
            if let Err(e) = joined {
                error!("delivery task failed: {e}");
            }
        }
    }
}

fn publish(report_tx: &broadcast::Sender<DeliveryReport>, dispatch: &Dispatch, outcome: DeliveryOutcome) {
    // no subscribers is fine
    let _ = report_tx.send(DeliveryReport {
        dispatch_id: dispatch.id,
        channel: dispatch.channel.clone(),
        kind: dispatch.kind,
        fingerprint: dispatch.fingerprint.clone(),
        outcome,
        finished_at: Utc::now(),
    });
}

#[instrument(skip_all, fields(channel = %dispatch.channel, dispatch = dispatch.id))]
async fn deliver(
    routed: Arc<RoutedChannel>,
    dispatch: Dispatch,
    stats: Arc<RouterStats>,
    report_tx: broadcast::Sender<DeliveryReport>,
) {
    let channel = &routed.channel;
    let mut attempts = 0;

    let outcome = loop {
        if let Some(limiter) = &routed.limiter {
            throttle(limiter, &stats).await;
        }

        attempts += 1;
        let result = match timeout(channel.timeout, routed.notifier.send(&dispatch)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryFailure::Timeout(channel.timeout)),
        };

        match result {
            Ok(ack) => {
                debug!("delivered after {attempts} attempt(s)");
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                break DeliveryOutcome::Delivered { attempts, ack };
            }
            Err(failure) if failure.is_retryable() && attempts <= channel.retries => {
                let delay = channel.backoff.delay(attempts);
                warn!("attempt {attempts} failed ({failure}), retrying in {}ms", delay.as_millis());
                stats.retries.fetch_add(1, Ordering::Relaxed);
                sleep(delay).await;
            }
            Err(failure) => {
                error!("giving up after {attempts} attempt(s): {failure}");
                stats.failed.fetch_add(1, Ordering::Relaxed);
                break DeliveryOutcome::Failed {
                    attempts,
                    error: failure.to_string(),
                };
            }
        }
    };

    publish(&report_tx, &dispatch, outcome);
}

/// Wait until the channel's limiter admits one delivery
async fn throttle(limiter: &RateLimiter, stats: &RouterStats) {
    let mut counted = false;
    while let Err(wait) = limiter.try_acquire(Utc::now()) {
        if !counted {
            debug!("channel rate limit reached, waiting {}ms", wait.as_millis());
            stats.throttled.fetch_add(1, Ordering::Relaxed);
            counted = true;
        }
        sleep(wait.max(MIN_THROTTLE_WAIT)).await;
    }
}

/// Handle for controlling the RouterActor
#[derive(Clone)]
pub struct RouterHandle {
    sender: mpsc::Sender<RouterCommand>,
    stats: Arc<RouterStats>,
    report_tx: broadcast::Sender<DeliveryReport>,
}

impl RouterHandle {
    /// Build every channel's transport and spawn the router
    ///
    /// Fails when a transport cannot be constructed (e.g. an invalid SMTP relay).
    pub fn spawn(channels: Vec<Channel>, dispatch_rx: mpsc::Receiver<Dispatch>) -> Result<Self> {
        let mut routed = HashMap::with_capacity(channels.len());
        for channel in channels {
            let notifier = build_notifier(&channel.transport)
                .with_context(|| format!("failed to set up {} channel '{}'", channel.kind().as_str(), channel.name))?;
            debug!("routing to {} channel '{}'", channel.kind().as_str(), channel.name);
            let limiter = channel.rate_limit.map(RateLimiter::new);
            routed.insert(
                channel.name.clone(),
                Arc::new(RoutedChannel {
                    channel,
                    notifier,
                    limiter,
                }),
            );
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (report_tx, _) = broadcast::channel(256);
        let stats = Arc::new(RouterStats::default());

        let actor = RouterActor::new(routed, dispatch_rx, cmd_rx, stats.clone(), report_tx.clone());
        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            stats,
            report_tx,
        })
    }

    /// Receive a report for every finished delivery from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryReport> {
        self.report_tx.subscribe()
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting dispatches and wait for accepted ones to finish
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RouterCommand::Shutdown { respond_to: tx })
            .await
            .context("router stopped")?;
        rx.await.context("router dropped shutdown acknowledgement")
    }
}
