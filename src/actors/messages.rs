//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Health events flow through bounded mpsc channels so a slow
//!    evaluator applies backpressure instead of dropping signals
//! 3. **Reports**: Delivery outcomes are broadcast to any number of observers

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::alerts::DispatchKind;
use crate::model::{Fingerprint, HealthEvent};
use crate::notify::Ack;

/// Commands that can be sent to a ServiceMonitor
#[derive(Debug)]
pub enum ServiceCommand {
    /// Run a full probe cycle immediately (bypassing the interval timer)
    ///
    /// Used for manual refresh. The event is published as usual and also sent
    /// back to the caller.
    CheckNow {
        respond_to: oneshot::Sender<HealthEvent>,
    },
}

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    /// Suppress every dispatch for a duration
    ///
    /// Useful for maintenance windows; lifts by itself.
    Mute { duration: Duration },

    Unmute,

    /// Drain queued events, stop the evaluators and acknowledge
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Commands that can be sent to the RouterActor
#[derive(Debug)]
pub enum RouterCommand {
    /// Stop accepting dispatches, finish the accepted ones, then acknowledge
    Shutdown { respond_to: oneshot::Sender<()> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum DeliveryOutcome {
    Delivered { attempts: u32, ack: Ack },
    /// Retries exhausted or the failure was permanent
    Failed { attempts: u32, error: String },
}

/// Final record of one dispatch's delivery, published by the router
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub dispatch_id: u64,
    pub channel: String,
    pub kind: DispatchKind,
    pub fingerprint: Fingerprint,
    pub outcome: DeliveryOutcome,
    pub finished_at: DateTime<Utc>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }
}
