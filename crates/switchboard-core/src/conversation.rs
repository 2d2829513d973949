//! Conversation partitioning
//!
//! A single remote agent can hold several conversations. These functions pick
//! the bucket ("conversation key") a channel or heartbeat should use.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Key for the conversation shared by all channels
pub const SHARED_KEY: &str = "shared";
/// Key for the dedicated heartbeat conversation
pub const HEARTBEAT_KEY: &str = "heartbeat";

/// How an agent splits its remote conversations across channels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationMode {
    #[default]
    Shared,
    PerChannel,
    PerChat,
}

/// Where heartbeat triggers are sent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum HeartbeatTarget {
    Dedicated,
    #[default]
    LastActive,
    /// Any other literal is used verbatim as the key
    Named(String),
}

impl From<String> for HeartbeatTarget {
    fn from(s: String) -> Self {
        match s.as_str() {
            "dedicated" => Self::Dedicated,
            "last-active" => Self::LastActive,
            _ => Self::Named(s),
        }
    }
}

impl From<HeartbeatTarget> for String {
    fn from(t: HeartbeatTarget) -> Self {
        match t {
            HeartbeatTarget::Dedicated => "dedicated".to_string(),
            HeartbeatTarget::LastActive => "last-active".to_string(),
            HeartbeatTarget::Named(s) => s,
        }
    }
}

/// Channels that get their own conversation even in shared mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOverrides(BTreeSet<String>);

impl ChannelOverrides {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            channels
                .into_iter()
                .map(|c| c.as_ref().to_lowercase())
                .collect(),
        )
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.0.contains(&channel.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Conversation key for a message arriving on `channel`.
///
/// `None` mode behaves as shared.
pub fn resolve_conversation_key(
    channel: &str,
    mode: Option<ConversationMode>,
    overrides: &ChannelOverrides,
) -> String {
    let channel = channel.to_lowercase();
    match mode.unwrap_or_default() {
        ConversationMode::PerChannel | ConversationMode::PerChat => channel,
        ConversationMode::Shared if overrides.contains(&channel) => channel,
        ConversationMode::Shared => SHARED_KEY.to_string(),
    }
}

/// Conversation key for a heartbeat trigger.
pub fn resolve_heartbeat_conversation_key(
    mode: Option<ConversationMode>,
    heartbeat: &HeartbeatTarget,
    overrides: &ChannelOverrides,
    last_active_channel: Option<&str>,
) -> String {
    match mode.unwrap_or_default() {
        ConversationMode::PerChannel | ConversationMode::PerChat => match heartbeat {
            HeartbeatTarget::Dedicated => HEARTBEAT_KEY.to_string(),
            HeartbeatTarget::LastActive => last_active_channel
                .map(str::to_string)
                .unwrap_or_else(|| SHARED_KEY.to_string()),
            HeartbeatTarget::Named(key) => key.clone(),
        },
        ConversationMode::Shared => match (heartbeat, last_active_channel) {
            (HeartbeatTarget::LastActive, Some(channel)) if overrides.contains(channel) => {
                channel.to_string()
            }
            _ => SHARED_KEY.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn none() -> ChannelOverrides {
        ChannelOverrides::default()
    }

    #[test]
    fn test_shared_mode() {
        assert_eq!(
            resolve_conversation_key("telegram", Some(ConversationMode::Shared), &none()),
            "shared"
        );
        assert_eq!(resolve_conversation_key("telegram", None, &none()), "shared");
    }

    #[test]
    fn test_shared_mode_override_is_case_insensitive() {
        let overrides = ChannelOverrides::new(["slack"]);
        assert_eq!(
            resolve_conversation_key("SLACK", Some(ConversationMode::Shared), &overrides),
            "slack"
        );
        let upper = ChannelOverrides::new(["Slack"]);
        assert_eq!(resolve_conversation_key("slack", None, &upper), "slack");
    }

    #[test]
    fn test_per_channel_mode() {
        assert_eq!(
            resolve_conversation_key("telegram", Some(ConversationMode::PerChannel), &none()),
            "telegram"
        );
        assert_eq!(
            resolve_conversation_key("Discord", Some(ConversationMode::PerChat), &none()),
            "discord"
        );
    }

    #[test]
    fn test_heartbeat_per_channel() {
        let mode = Some(ConversationMode::PerChannel);
        assert_eq!(
            resolve_heartbeat_conversation_key(mode, &HeartbeatTarget::Dedicated, &none(), None),
            "heartbeat"
        );
        assert_eq!(
            resolve_heartbeat_conversation_key(mode, &HeartbeatTarget::LastActive, &none(), None),
            "shared"
        );
        assert_eq!(
            resolve_heartbeat_conversation_key(
                mode,
                &HeartbeatTarget::LastActive,
                &none(),
                Some("telegram")
            ),
            "telegram"
        );
        assert_eq!(
            resolve_heartbeat_conversation_key(
                mode,
                &HeartbeatTarget::Named("ops".to_string()),
                &none(),
                Some("telegram")
            ),
            "ops"
        );
    }

    #[test]
    fn test_heartbeat_shared() {
        let mode = Some(ConversationMode::Shared);
        let overrides = ChannelOverrides::new(["slack"]);
        assert_eq!(
            resolve_heartbeat_conversation_key(
                mode,
                &HeartbeatTarget::LastActive,
                &overrides,
                Some("slack")
            ),
            "slack"
        );
        assert_eq!(
            resolve_heartbeat_conversation_key(
                mode,
                &HeartbeatTarget::LastActive,
                &overrides,
                Some("telegram")
            ),
            "shared"
        );
        assert_eq!(
            resolve_heartbeat_conversation_key(
                mode,
                &HeartbeatTarget::Dedicated,
                &overrides,
                Some("slack")
            ),
            "shared"
        );
    }

    #[test]
    fn test_heartbeat_last_active_returned_as_given() {
        assert_eq!(
            resolve_heartbeat_conversation_key(
                Some(ConversationMode::PerChannel),
                &HeartbeatTarget::LastActive,
                &none(),
                Some("Telegram")
            ),
            "Telegram"
        );
        assert_eq!(
            resolve_heartbeat_conversation_key(
                Some(ConversationMode::Shared),
                &HeartbeatTarget::LastActive,
                &ChannelOverrides::new(["slack"]),
                Some("SLACK")
            ),
            "SLACK"
        );
    }

    #[test]
    fn test_heartbeat_target_from_config_string() {
        let t: HeartbeatTarget = serde_json::from_str("\"dedicated\"").unwrap();
        assert_eq!(t, HeartbeatTarget::Dedicated);
        let t: HeartbeatTarget = serde_json::from_str("\"ops-room\"").unwrap();
        assert_eq!(t, HeartbeatTarget::Named("ops-room".to_string()));
        let mode: ConversationMode = serde_json::from_str("\"per-channel\"").unwrap();
        assert_eq!(mode, ConversationMode::PerChannel);
    }
}
