//! Paging service (PagerDuty Events API v2)
//!
//! The alert fingerprint is the dedup key, so a resolution closes exactly the
//! incident its firing opened.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{Ack, DeliveryFailure, Notifier, check_response, http_client, transport_error};
use crate::alerts::{Dispatch, DispatchKind};
use crate::model::Severity;

const DEFAULT_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

#[derive(Debug, Clone, Deserialize)]
pub struct PagerConfig {
    pub routing_key: String,

    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    DEFAULT_EVENTS_URL.to_string()
}

pub struct PagerNotifier {
    client: reqwest::Client,
    config: PagerConfig,
}

impl PagerNotifier {
    pub fn new(config: PagerConfig) -> Self {
        Self {
            client: http_client(),
            config,
        }
    }

    pub fn payload(&self, dispatch: &Dispatch) -> serde_json::Value {
        match dispatch.kind {
            DispatchKind::Firing => json!({
                "routing_key": self.config.routing_key,
                "event_action": "trigger",
                "dedup_key": dispatch.fingerprint,
                "payload": {
                    "summary": dispatch.title,
                    "source": dispatch.service,
                    "severity": pager_severity(dispatch.severity),
                    "timestamp": dispatch.created_at.to_rfc3339(),
                    "custom_details": {
                        "message": dispatch.message,
                        "rule": dispatch.rule,
                    }
                }
            }),
            DispatchKind::Resolved => json!({
                "routing_key": self.config.routing_key,
                "event_action": "resolve",
                "dedup_key": dispatch.fingerprint,
            }),
        }
    }
}

fn pager_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Error => "error",
        Severity::Critical => "critical",
    }
}

#[async_trait]
impl Notifier for PagerNotifier {
    #[instrument(skip(self, dispatch), fields(dispatch = dispatch.id))]
    async fn send(&self, dispatch: &Dispatch) -> Result<Ack, DeliveryFailure> {
        let response = self
            .client
            .post(&self.config.url)
            .json(&self.payload(dispatch))
            .send()
            .await
            .map_err(transport_error)?;

        let ack = check_response(response).await?;
        debug!("page accepted");
        Ok(ack.detail(dispatch.fingerprint.to_string()))
    }
}
