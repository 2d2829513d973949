//! switchboard-core - Routing and agent session orchestration
//!
//! This crate provides:
//! - Binding-based routing of inbound messages to agents
//! - Conversation key resolution for shared and per-channel conversations
//! - Agent instances with persisted identity, serialized work queues and
//!   session recovery
//! - The agent manager and the remote platform / channel adapter traits

pub mod agents;
pub mod channel;
pub mod conversation;
pub mod envelope;
pub mod error;
pub mod platform;
pub mod routing;
pub mod timeout;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types for convenience
pub use agents::{
    AgentConfig, AgentInstance, AgentManager, AgentState, AgentStatus, InstanceSettings,
    MessageTarget, StateStore,
};
pub use channel::{AdapterKey, ChannelAdapter};
pub use conversation::{ConversationMode, HeartbeatTarget};
pub use error::{AgentError, Result};
pub use platform::{AgentPlatform, AgentSession, HttpPlatform};
pub use routing::{Binding, MatchLevel, PeerKind, Router, RoutingContext, RoutingResult};
pub use types::{
    InboundMessage, OutboundMessage, OutputMode, SentMessage, TriggerContext, TriggerType,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_route_for_unbound_channel() {
        let router = Router::new(Vec::new(), "main");
        let ctx = RoutingContext::channel("console");
        let result = router.route(&ctx);
        assert_eq!(result.agent_id, "main");
        assert_eq!(result.match_level, MatchLevel::Default);
    }
}
