use chrono::Utc;
use serde::Serialize;

use crate::alerts::OperationalNotice;
use crate::{Alert, Severity};

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

impl EmbedField {
    fn inline(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline: true,
        }
    }
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

    /// Mentions `user_id` in the message content, if given
    pub fn mention(self, user_id: Option<&str>, prefix: &str) -> Self {
        match user_id {
            Some(user_id) => self.content(format!("{prefix} <@{user_id}>")),
            None => self,
        }
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

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const PURPLE: u32 = 10181046;

fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => RED,
        Severity::Warning => ORANGE,
    }
}

pub fn build_alert_embed(alert: &Alert) -> Embed {
    let title = match alert.severity {
        Severity::Critical => "🔥 Critical Threshold Breach",
        Severity::Warning => "⚠️ Threshold Warning",
    };

    Embed {
        title: Some(title.to_string()),
        description: Some(alert.message.clone()),
        color: Some(severity_color(alert.severity)),
        fields: vec![
            EmbedField::inline("🏭 Source", &alert.source_id),
            EmbedField::inline("📟 Sensor", &alert.sensor_id),
            EmbedField::inline("📈 Value", alert.value),
        ],
        footer: Some(EmbedFooter {
            text: format!("Alert {}", alert.alert_id),
        }),
        timestamp: Some(alert.timestamp.to_rfc3339()),
    }
}

pub fn build_operational_embed(notice: &OperationalNotice) -> Embed {
    Embed {
        title: Some(format!("🛠️ {}", notice.title)),
        description: Some(notice.detail.clone()),
        color: Some(PURPLE),
        fields: Vec::new(),
        footer: Some(EmbedFooter {
            text: "telemetry pipeline".to_string(),
        }),
        timestamp: Some(Utc::now().to_rfc3339()),
    }
}

pub fn alert_message(alert: &Alert, user_id: Option<&str>) -> Message {
    MessageBuilder::new()
        .mention(
            user_id,
            &format!("{} {} = {}", alert.severity, alert.sensor_id, alert.value),
        )
        .add_embed(build_alert_embed(alert))
        .build()
}

pub fn operational_message(notice: &OperationalNotice, user_id: Option<&str>) -> Message {
    MessageBuilder::new()
        .mention(user_id, &notice.title)
        .add_embed(build_operational_embed(notice))
        .build()
}
