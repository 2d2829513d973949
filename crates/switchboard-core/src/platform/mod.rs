//! Remote agent platform abstraction
//!
//! Session establishment always receives the target identity explicitly via
//! [`SessionOptions`]; nothing is passed through process-wide state, so
//! concurrent agent instances never observe each other's identity.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpPlatform;

/// A block of core memory seeded into a freshly created agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryBlock {
    pub label: String,
    pub value: String,
}

impl MemoryBlock {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Parameters for creating a new remote agent
#[derive(Debug, Clone, Default)]
pub struct CreateAgentOptions {
    pub name: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub memory: Vec<MemoryBlock>,
}

/// What a session is opened against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// The agent's default conversation (resume) or a new one (create)
    Agent(String),
    /// A specific stored conversation
    Conversation(String),
}

impl std::fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "agent {}", id),
            Self::Conversation(id) => write!(f, "conversation {}", id),
        }
    }
}

/// Explicit parameters carried on every session-establishment call
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Identity the session acts for. Required for conversation targets.
    pub agent_id: Option<String>,
    pub model: Option<String>,
    pub workspace: Option<std::path::PathBuf>,
    pub system_prompt: Option<String>,
}

/// Typed events read from a session's reply stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A chunk of assistant text
    AssistantText(String),
    /// Terminal event carrying the identifiers the session resolved to
    Result {
        success: bool,
        agent_id: Option<String>,
        conversation_id: Option<String>,
        error: Option<String>,
    },
    /// Anything the orchestrator does not interpret (tool calls, reasoning)
    Other,
}

/// Live handle to a remote conversational exchange
#[async_trait]
pub trait AgentSession: Send {
    async fn initialize(&mut self) -> Result<()>;

    async fn send(&mut self, text: &str) -> Result<()>;

    /// Next event of the reply stream; `None` once the stream has ended
    async fn next_event(&mut self) -> Result<Option<StreamEvent>>;

    /// Release the session. Never fails; problems are logged by implementors.
    async fn close(&mut self);
}

/// Client for the remote agent platform
#[async_trait]
pub trait AgentPlatform: Send + Sync {
    async fn create_agent(&self, options: &CreateAgentOptions) -> Result<String>;

    /// Open a brand-new conversation against the target
    async fn create_session(
        &self,
        target: &SessionTarget,
        options: &SessionOptions,
    ) -> Result<Box<dyn AgentSession>>;

    /// Reopen an existing conversation (or the agent's default one)
    async fn resume_session(
        &self,
        target: &SessionTarget,
        options: &SessionOptions,
    ) -> Result<Box<dyn AgentSession>>;

    async fn agent_exists(&self, agent_id: &str) -> Result<bool>;

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<String>>;

    /// Set the agent's display name
    async fn rename_agent(&self, agent_id: &str, name: &str) -> Result<()>;

    /// Base URL recorded alongside persisted identities
    fn base_url(&self) -> Option<&str> {
        None
    }
}
