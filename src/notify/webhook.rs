//! Generic JSON webhook

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{Ack, DeliveryFailure, Notifier, check_response, http_client, transport_error};
use crate::alerts::Dispatch;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Extra request headers, e.g. an authorization token
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            client: http_client(),
            config,
        }
    }
}

pub fn payload(dispatch: &Dispatch) -> serde_json::Value {
    json!({
        "id": dispatch.id,
        "kind": dispatch.kind,
        "title": dispatch.title,
        "message": dispatch.message,
        "service": dispatch.service,
        "rule": dispatch.rule,
        "severity": dispatch.severity,
        "fingerprint": dispatch.fingerprint,
        "timestamp": dispatch.created_at.to_rfc3339()
    })
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, dispatch), fields(dispatch = dispatch.id))]
    async fn send(&self, dispatch: &Dispatch) -> Result<Ack, DeliveryFailure> {
        let mut request = self.client.post(&self.config.url).json(&payload(dispatch));
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(transport_error)?;
        let ack = check_response(response).await?;
        debug!("webhook accepted");
        Ok(ack)
    }
}
