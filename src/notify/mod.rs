//! Notification transports
//!
//! Every channel kind (SMTP, chat webhook, paging API, generic webhook, log)
//! exposes the same [`Notifier`] contract. Retries, throttling and per-attempt
//! timeouts are the router's business, a notifier performs exactly one attempt.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::alerts::Dispatch;

pub mod channel;
pub mod chat;
pub mod email;
pub mod log;
pub mod pager;
pub mod webhook;

pub use channel::{Channel, ChannelConfigError, ChannelKind, ChannelTransport};

/// Positive delivery acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Transport status, e.g. the HTTP status code or SMTP reply code
    pub status: Option<u16>,
    pub detail: Option<String>,
}

impl Ack {
    pub fn with_status(status: u16) -> Self {
        Self {
            status: Some(status),
            detail: None,
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Failure of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Connection, TLS or protocol problem on the way to the endpoint
    Transport(String),

    /// The attempt exceeded the channel timeout
    Timeout(Duration),

    /// The endpoint answered with a non-success HTTP status
    Rejected { status: u16, body: String },

    /// The endpoint refused for good (e.g. SMTP 5xx); retrying cannot help
    Permanent(String),

    /// The channel cannot be used as configured
    Misconfigured(String),
}

impl DeliveryFailure {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryFailure::Transport(_) | DeliveryFailure::Timeout(_) => true,
            DeliveryFailure::Rejected { status, .. } => *status >= 500 || *status == 429,
            DeliveryFailure::Permanent(_) | DeliveryFailure::Misconfigured(_) => false,
        }
    }
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Transport(msg) => write!(f, "transport error: {}", msg),
            DeliveryFailure::Timeout(timeout) => {
                write!(f, "delivery timed out after {}ms", timeout.as_millis())
            }
            DeliveryFailure::Rejected { status, body } if body.is_empty() => {
                write!(f, "endpoint rejected delivery with status {}", status)
            }
            DeliveryFailure::Rejected { status, body } => {
                write!(f, "endpoint rejected delivery with status {}: {}", status, body)
            }
            DeliveryFailure::Permanent(msg) => write!(f, "permanent failure: {}", msg),
            DeliveryFailure::Misconfigured(msg) => write!(f, "misconfigured channel: {}", msg),
        }
    }
}

impl std::error::Error for DeliveryFailure {}

/// One delivery attempt through one transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, dispatch: &Dispatch) -> Result<Ack, DeliveryFailure>;
}

/// Instantiate the transport for a channel
pub fn build_notifier(transport: &ChannelTransport) -> Result<Arc<dyn Notifier>, DeliveryFailure> {
    let notifier: Arc<dyn Notifier> = match transport {
        ChannelTransport::Email(config) => Arc::new(email::EmailNotifier::new(config)?),
        ChannelTransport::Chat(config) => Arc::new(chat::ChatNotifier::new(config.clone())),
        ChannelTransport::Pager(config) => Arc::new(pager::PagerNotifier::new(config.clone())),
        ChannelTransport::Webhook(config) => Arc::new(webhook::WebhookNotifier::new(config.clone())),
        ChannelTransport::Log => Arc::new(log::LogNotifier),
    };
    Ok(notifier)
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("health-sentinel/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Turn a webhook-style response into an ack or a rejection
pub(crate) async fn check_response(response: reqwest::Response) -> Result<Ack, DeliveryFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(Ack::with_status(status.as_u16()));
    }

    let body = response.text().await.unwrap_or_default();
    Err(DeliveryFailure::Rejected {
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    })
}

pub(crate) fn transport_error(err: reqwest::Error) -> DeliveryFailure {
    // reqwest's Display omits the source chain
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    DeliveryFailure::Transport(message)
}
