//! Persisted identity and session state, one JSON file per agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::conversation::SHARED_KEY;

/// Chat the agent last heard from; heartbeat replies go here
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageTarget {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Where an agent instance stands in its session lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    NoIdentity,
    Identity,
    IdentityAndConversation,
}

/// Persisted state of one agent instance.
///
/// Conversation ids are only meaningful while `agent_id` is set.
/// `conversation_id` mirrors the shared conversation for older state files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conversations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_target: Option<MessageTarget>,
}

impl AgentState {
    /// Stored conversation for a key, if the agent has an identity
    pub fn conversation_for(&self, key: &str) -> Option<&str> {
        self.agent_id.as_ref()?;
        if let Some(id) = self.conversations.get(key) {
            return Some(id);
        }
        if key == SHARED_KEY {
            return self.conversation_id.as_deref();
        }
        None
    }

    pub fn set_conversation(&mut self, key: &str, conversation_id: impl Into<String>) {
        let conversation_id = conversation_id.into();
        if key == SHARED_KEY {
            self.conversation_id = Some(conversation_id.clone());
        }
        self.conversations.insert(key.to_string(), conversation_id);
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.agent_id, &self.conversation_id) {
            (None, _) => SessionPhase::NoIdentity,
            (Some(_), Some(_)) => SessionPhase::IdentityAndConversation,
            (Some(_), None) if !self.conversations.is_empty() => {
                SessionPhase::IdentityAndConversation
            }
            (Some(_), None) => SessionPhase::Identity,
        }
    }

    /// Channel of the most recent inbound message
    pub fn last_active_channel(&self) -> Option<&str> {
        self.last_message_target
            .as_ref()
            .map(|t| t.channel.as_str())
    }
}

/// Reads and writes one agent's state file.
///
/// Failures are logged and treated as "not found" / "not saved"; they never
/// abort message processing.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Well-known per-agent location under a state directory
    pub fn for_agent(state_dir: &Path, agent_id: &str) -> Self {
        Self::new(state_dir.join(format!("{}.json", agent_id)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> AgentState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", self.path.display());
                return AgentState::default();
            }
            Err(e) => {
                warn!("Failed to read state {}: {}", self.path.display(), e);
                return AgentState::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to parse state {}: {}", self.path.display(), e);
                AgentState::default()
            }
        }
    }

    /// Write the state; returns whether the write succeeded
    pub fn save(&self, state: &AgentState) -> bool {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create state dir {}: {}", parent.display(), e);
                return false;
            }
        }
        let json = match serde_json::to_string_pretty(state) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize state for {}: {}", self.path.display(), e);
                return false;
            }
        };
        match std::fs::write(&self.path, json) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write state {}: {}", self.path.display(), e);
                false
            }
        }
    }
}
