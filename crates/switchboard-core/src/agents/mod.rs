//! Agents: configuration, persisted state, live instances and their manager
//!
//! Each configured agent is backed by one [`AgentInstance`] that owns the
//! agent's remote identity, its conversations and a serialized work queue.

pub mod config;
pub mod instance;
pub mod manager;
pub mod state;

pub use config::{AgentConfig, ConversationConfig};
pub use instance::{AgentInstance, AgentStatus, InstanceSettings, NO_RESPONSE_TEXT};
pub use manager::{AgentManager, ManagerStatus};
pub use state::{AgentState, MessageTarget, SessionPhase, StateStore};
