//! Shared types for switchboard-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound message from any channel adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel id, e.g. "telegram", "slack"
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub chat_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<Reaction>,
}

impl InboundMessage {
    /// Minimal direct message, mostly useful for adapters and tests.
    pub fn direct(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            account_id: None,
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_name: None,
            text: text.into(),
            timestamp: Utc::now(),
            message_id: None,
            is_group: false,
            group_name: None,
            attachments: Vec::new(),
            reaction: None,
        }
    }
}

/// File or media attached to an inbound message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

/// Emoji reaction added to or removed from an earlier message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub target_message_id: String,
    #[serde(default)]
    pub removed: bool,
}

/// Outbound message handed to a channel adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_to: None,
        }
    }
}

/// Handle for a message an adapter created on the platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
}

/// Why an agent is being invoked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    UserMessage,
    Heartbeat,
    Cron,
    Webhook,
    Feed,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserMessage => write!(f, "user_message"),
            Self::Heartbeat => write!(f, "heartbeat"),
            Self::Cron => write!(f, "cron"),
            Self::Webhook => write!(f, "webhook"),
            Self::Feed => write!(f, "feed"),
        }
    }
}

/// Whether a triggered reply is delivered to a chat or only logged
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Silent,
    Deliver,
}

/// Describes a non-chat invocation (heartbeat, cron job, webhook, feed)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TriggerContext {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub output_mode: OutputMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_target: Option<crate::agents::state::MessageTarget>,
}

impl TriggerContext {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            ..Self::default()
        }
    }

    pub fn with_output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_defaults_from_json() {
        let msg: InboundMessage = serde_json::from_value(serde_json::json!({
            "channel": "telegram",
            "chat_id": "42",
            "user_id": "u1",
            "text": "hi",
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert!(!msg.is_group);
        assert!(msg.attachments.is_empty());
        assert!(msg.account_id.is_none());
    }

    #[test]
    fn test_trigger_type_serde() {
        let ctx = TriggerContext::new(TriggerType::Heartbeat);
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["output_mode"], "silent");
        assert_eq!(TriggerType::UserMessage.to_string(), "user_message");
    }
}
