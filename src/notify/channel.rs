//! Channel definitions

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::chat::ChatConfig;
use super::email::EmailConfig;
use super::pager::PagerConfig;
use super::webhook::WebhookConfig;
use crate::alerts::ChannelRoute;
use crate::alerts::rate_limit::RateLimitConfig;
use crate::backoff::BackoffPolicy;
use crate::model::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Chat,
    Pager,
    Webhook,
    Log,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Chat => "chat",
            ChannelKind::Pager => "pager",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Log => "log",
        }
    }
}

/// Why a channel's `config` was rejected
#[derive(Debug)]
pub enum ChannelConfigError {
    /// The object does not deserialize into the kind's settings
    Malformed { kind: ChannelKind, source: serde_json::Error },

    /// Well-formed but unusable settings
    Invalid(String),
}

impl fmt::Display for ChannelConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelConfigError::Malformed { kind, source } => {
                write!(f, "malformed {} settings: {}", kind.as_str(), source)
            }
            ChannelConfigError::Invalid(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for ChannelConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelConfigError::Malformed { source, .. } => Some(source),
            ChannelConfigError::Invalid(_) => None,
        }
    }
}

/// Delivery configuration per kind
#[derive(Debug, Clone)]
pub enum ChannelTransport {
    Email(EmailConfig),
    Chat(ChatConfig),
    Pager(PagerConfig),
    Webhook(WebhookConfig),
    Log,
}

impl ChannelTransport {
    /// Parse the free-form `config` object of a channel of `kind`
    pub fn from_config(kind: ChannelKind, config: serde_json::Value) -> Result<Self, ChannelConfigError> {
        fn parse<T: serde::de::DeserializeOwned>(
            kind: ChannelKind,
            config: serde_json::Value,
        ) -> Result<T, ChannelConfigError> {
            serde_json::from_value(config).map_err(|source| ChannelConfigError::Malformed { kind, source })
        }

        match kind {
            ChannelKind::Email => {
                let config: EmailConfig = parse(kind, config)?;
                config.validate()?;
                Ok(ChannelTransport::Email(config))
            }
            ChannelKind::Chat => Ok(ChannelTransport::Chat(parse(kind, config)?)),
            ChannelKind::Pager => Ok(ChannelTransport::Pager(parse(kind, config)?)),
            ChannelKind::Webhook => Ok(ChannelTransport::Webhook(parse(kind, config)?)),
            ChannelKind::Log => Ok(ChannelTransport::Log),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelTransport::Email(_) => ChannelKind::Email,
            ChannelTransport::Chat(_) => ChannelKind::Chat,
            ChannelTransport::Pager(_) => ChannelKind::Pager,
            ChannelTransport::Webhook(_) => ChannelKind::Webhook,
            ChannelTransport::Log => ChannelKind::Log,
        }
    }
}

/// A named, validated delivery target
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub transport: ChannelTransport,
    pub severity_filter: Option<Severity>,
    /// Retries after the first failed attempt
    pub retries: u32,
    pub backoff: BackoffPolicy,
    pub rate_limit: Option<RateLimitConfig>,
    pub send_resolved: bool,
    pub timeout: Duration,
}

impl Channel {
    /// Channel with default delivery policy around `transport`
    pub fn new(name: impl Into<String>, transport: ChannelTransport) -> Self {
        Self {
            name: name.into(),
            transport,
            severity_filter: None,
            retries: 3,
            backoff: BackoffPolicy::default(),
            rate_limit: None,
            send_resolved: true,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.transport.kind()
    }

    /// What the alert engine needs to know about this channel
    pub fn route(&self) -> ChannelRoute {
        ChannelRoute {
            severity_filter: self.severity_filter,
            send_resolved: self.send_resolved,
        }
    }
}
