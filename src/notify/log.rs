//! Log sink: notifications become tracing events

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Ack, DeliveryFailure, Notifier};
use crate::alerts::{Dispatch, DispatchKind};
use crate::model::Severity;

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, dispatch: &Dispatch) -> Result<Ack, DeliveryFailure> {
        let urgent = dispatch.kind == DispatchKind::Firing && dispatch.severity >= Severity::Error;
        if urgent {
            warn!(
                target: "health_sentinel::notifications",
                channel = %dispatch.channel,
                fingerprint = %dispatch.fingerprint,
                "{}: {}",
                dispatch.title,
                dispatch.message
            );
        } else {
            info!(
                target: "health_sentinel::notifications",
                channel = %dispatch.channel,
                fingerprint = %dispatch.fingerprint,
                "{}: {}",
                dispatch.title,
                dispatch.message
            );
        }
        Ok(Ack {
            status: None,
            detail: None,
        })
    }
}
