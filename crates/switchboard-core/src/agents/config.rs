//! Agent configuration: identity, resources and conversation layout

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::conversation::{ChannelOverrides, ConversationMode, HeartbeatTarget};
use crate::platform::MemoryBlock;

/// Static per-agent identity and resources, read-only to the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    /// Display name; also used to find the agent on the remote platform
    pub name: String,
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Memory blocks seeded into a freshly created remote agent
    #[serde(default = "default_memory")]
    pub memory: Vec<MemoryBlock>,
    #[serde(default)]
    pub conversations: ConversationConfig,
}

fn default_memory() -> Vec<MemoryBlock> {
    vec![
        MemoryBlock::new(
            "persona",
            "I am a helpful assistant reachable from several chat platforms.",
        ),
        MemoryBlock::new("human", "Nothing is known about the user yet."),
    ]
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            workspace: None,
            model: None,
            default: false,
            system_prompt: None,
            memory: default_memory(),
            conversations: ConversationConfig::default(),
        }
    }
}

/// How an agent partitions its remote conversations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Unset behaves as shared
    #[serde(default)]
    pub mode: Option<ConversationMode>,
    #[serde(default)]
    pub heartbeat: HeartbeatTarget,
    /// Channels with their own conversation in shared mode
    #[serde(default)]
    pub per_channel: Vec<String>,
}

impl ConversationConfig {
    pub fn overrides(&self) -> ChannelOverrides {
        ChannelOverrides::new(&self.per_channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_defaults() {
        let cfg: AgentConfig = toml::from_str(
            r#"
            id = "main"
            name = "Main"
            "#,
        )
        .unwrap();
        assert!(!cfg.default);
        assert_eq!(cfg.memory.len(), 2);
        assert!(cfg.conversations.mode.is_none());
        assert_eq!(cfg.conversations.heartbeat, HeartbeatTarget::LastActive);
    }

    #[test]
    fn test_conversation_config_from_toml() {
        let cfg: AgentConfig = toml::from_str(
            r#"
            id = "ops"
            name = "Ops"
            model = "openai/gpt-4o"

            [conversations]
            mode = "shared"
            heartbeat = "dedicated"
            per_channel = ["Slack"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.conversations.mode, Some(ConversationMode::Shared));
        assert_eq!(cfg.conversations.heartbeat, HeartbeatTarget::Dedicated);
        assert!(cfg.conversations.overrides().contains("slack"));
    }
}
