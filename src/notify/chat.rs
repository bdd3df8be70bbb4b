//! Chat webhooks (Discord embeds, Slack incoming webhooks)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::{Ack, DeliveryFailure, Notifier, check_response, http_client, transport_error};
use crate::alerts::{Dispatch, DispatchKind};
use crate::model::Severity;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatFlavor {
    #[default]
    Discord,
    Slack,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub url: String,

    #[serde(default)]
    pub flavor: ChatFlavor,

    /// User id to ping alongside firing alerts
    pub mention: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

fn color(dispatch: &Dispatch) -> u32 {
    match (dispatch.kind, dispatch.severity) {
        (DispatchKind::Resolved, _) => 3066993,            // Green
        (_, Severity::Critical) => 15158332,               // Red
        (_, Severity::Error) => 15105570,                  // Orange
        (_, Severity::Warning) => 16776960,                // Yellow
        (_, Severity::Info) => 5793266,                    // Light blue
    }
}

fn emoji(dispatch: &Dispatch) -> &'static str {
    match (dispatch.kind, dispatch.severity) {
        (DispatchKind::Resolved, _) => "✅",
        (_, Severity::Critical | Severity::Error) => "🔴",
        (_, Severity::Warning) => "🟠",
        (_, Severity::Info) => "🔵",
    }
}

pub fn build_embed(dispatch: &Dispatch) -> Embed {
    Embed {
        title: Some(format!("{} {}", emoji(dispatch), dispatch.title)),
        description: Some(dispatch.message.clone()),
        color: Some(color(dispatch)),
        fields: vec![
            EmbedField {
                name: "Service".to_string(),
                value: format!("`{}`", dispatch.service),
                inline: true,
            },
            EmbedField {
                name: "Severity".to_string(),
                value: dispatch.severity.to_string(),
                inline: true,
            },
            EmbedField {
                name: "Rule".to_string(),
                value: dispatch.rule.clone(),
                inline: true,
            },
        ],
        footer: Some(EmbedFooter {
            text: format!("fingerprint {}", dispatch.fingerprint),
        }),
        timestamp: Some(dispatch.created_at.to_rfc3339()),
    }
}

pub struct ChatNotifier {
    client: reqwest::Client,
    config: ChatConfig,
}

impl ChatNotifier {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            client: http_client(),
            config,
        }
    }

    fn mention(&self, dispatch: &Dispatch) -> Option<String> {
        let user_id = self.config.mention.as_ref()?;
        (dispatch.kind == DispatchKind::Firing).then(|| format!("<@{user_id}>"))
    }

    pub fn payload(&self, dispatch: &Dispatch) -> serde_json::Value {
        match self.config.flavor {
            ChatFlavor::Discord => {
                let mut builder = MessageBuilder::new().add_embed(build_embed(dispatch));
                if let Some(mention) = self.mention(dispatch) {
                    builder = builder.content(format!(
                        "{} Service: `{}` {mention}",
                        emoji(dispatch),
                        dispatch.service
                    ));
                }
                json!(builder.build())
            }
            ChatFlavor::Slack => {
                let mut text = format!("{} *{}*\n{}", emoji(dispatch), dispatch.title, dispatch.message);
                if let Some(mention) = self.mention(dispatch) {
                    text.push(' ');
                    text.push_str(&mention);
                }
                json!({ "text": text })
            }
        }
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
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
        debug!("chat message accepted");
        Ok(ack)
    }
}
