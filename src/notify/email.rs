//! SMTP email channel

use std::fmt;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::channel::ChannelConfigError;
use super::{Ack, DeliveryFailure, Notifier};
use crate::alerts::Dispatch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Upgrade a plain connection (port 587)
    #[default]
    Starttls,
    /// Implicit TLS (port 465)
    Tls,
    /// No encryption, local relays only
    None,
}

#[derive(Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub security: SmtpSecurity,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

impl EmailConfig {
    pub fn validate(&self) -> Result<(), ChannelConfigError> {
        if self.to.is_empty() {
            return Err(ChannelConfigError::Invalid(
                "email channel needs at least one recipient".to_string(),
            ));
        }
        for address in std::iter::once(&self.from).chain(&self.to) {
            address
                .parse::<Mailbox>()
                .map_err(|err| ChannelConfigError::Invalid(format!("invalid address '{address}': {err}")))?;
        }
        Ok(())
    }
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

fn misconfigured(err: impl fmt::Display) -> DeliveryFailure {
    DeliveryFailure::Misconfigured(err.to_string())
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, DeliveryFailure> {
        let mut builder = match config.security {
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host).map_err(misconfigured)?
            }
            SmtpSecurity::Tls => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host).map_err(misconfigured)?
            }
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host),
        };

        if let Some(port) = config.smtp_port {
            builder = builder.port(port);
        }
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.from.parse().map_err(misconfigured)?,
            to: config
                .to
                .iter()
                .map(|address| address.parse().map_err(misconfigured))
                .collect::<Result<_, _>>()?,
        })
    }

    fn build_message(&self, dispatch: &Dispatch) -> Result<Message, DeliveryFailure> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(&dispatch.title)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        builder
            .body(format!(
                "{}\n\nService: {}\nRule: {}\nSeverity: {}\nFingerprint: {}\nTime: {}",
                dispatch.message,
                dispatch.service,
                dispatch.rule,
                dispatch.severity,
                dispatch.fingerprint,
                dispatch.created_at.to_rfc3339()
            ))
            .map_err(misconfigured)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip(self, dispatch), fields(dispatch = dispatch.id))]
    async fn send(&self, dispatch: &Dispatch) -> Result<Ack, DeliveryFailure> {
        let message = self.build_message(dispatch)?;

        let response = self.transport.send(message).await.map_err(|err| {
            if err.is_permanent() {
                DeliveryFailure::Permanent(err.to_string())
            } else {
                DeliveryFailure::Transport(err.to_string())
            }
        })?;

        debug!("mail accepted by relay");
        let code = response.code().to_string().parse().ok();
        Ok(Ack {
            status: code,
            detail: None,
        })
    }
}
