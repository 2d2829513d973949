//! Channel adapter contract consumed by agents and the gateway

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{InboundMessage, OutboundMessage, SentMessage};

/// Trait that all channel adapters implement
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel id this adapter serves, e.g. "telegram"
    fn channel(&self) -> &str;

    /// Account on the channel, when one process serves several bots
    fn account_id(&self) -> Option<&str> {
        None
    }

    /// Start listening. Every logical inbound event is pushed to `tx` once.
    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Stop listening and release platform resources
    async fn stop(&self) -> Result<()>;

    /// Send a new message, returning its platform id
    async fn send_message(&self, msg: OutboundMessage) -> Result<SentMessage>;

    /// Replace the text of a message this adapter sent earlier
    async fn edit_message(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()>;

    /// Show a typing indicator in the chat
    async fn send_typing_indicator(&self, chat_id: &str) -> Result<()>;

    /// Whether `edit_message` is supported
    fn supports_editing(&self) -> bool {
        false
    }
}

/// Registry key for an adapter: channel id plus optional account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterKey {
    pub channel: String,
    pub account_id: Option<String>,
}

impl AdapterKey {
    pub fn new(channel: impl Into<String>, account_id: Option<String>) -> Self {
        Self {
            channel: channel.into(),
            account_id,
        }
    }

    pub fn of(adapter: &dyn ChannelAdapter) -> Self {
        Self::new(adapter.channel(), adapter.account_id().map(str::to_string))
    }
}

impl std::fmt::Display for AdapterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.account_id {
            Some(account) => write!(f, "{}:{}", self.channel, account),
            None => write!(f, "{}", self.channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_key_display() {
        assert_eq!(AdapterKey::new("slack", None).to_string(), "slack");
        assert_eq!(
            AdapterKey::new("slack", Some("work".to_string())).to_string(),
            "slack:work"
        );
    }
}
