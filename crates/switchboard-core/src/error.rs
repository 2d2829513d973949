//! Error types for agent orchestration

use std::time::Duration;

/// Result alias for agent-facing operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors surfaced by agent instances and the manager.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A bounded remote operation did not settle in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The remote agent platform reported a failure.
    #[error(transparent)]
    Remote(#[from] anyhow::Error),

    /// The instance's work queue is no longer accepting entries.
    #[error("agent '{agent}' queue is closed")]
    QueueClosed { agent: String },

    /// The routed agent id has no live instance.
    #[error("no agent instance registered for '{agent}'")]
    UnknownAgent { agent: String },
}

impl AgentError {
    #[must_use]
    pub fn unknown_agent(agent: impl std::fmt::Display) -> Self {
        Self::UnknownAgent {
            agent: agent.to_string(),
        }
    }

    #[must_use]
    pub fn queue_closed(agent: impl std::fmt::Display) -> Self {
        Self::QueueClosed {
            agent: agent.to_string(),
        }
    }

    /// Whether this failure came from the remote side (including timeouts).
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = AgentError::Timeout {
            operation: "initialize",
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "initialize timed out after 30s");
        assert!(err.is_remote());

        let err = AgentError::Timeout {
            operation: "send",
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "send timed out after 250ms");
    }

    #[test]
    fn test_remote_is_transparent() {
        let err = AgentError::from(anyhow::anyhow!("conversation not found"));
        assert_eq!(err.to_string(), "conversation not found");
        assert!(err.is_remote());
    }

    #[test]
    fn test_unknown_agent() {
        let err = AgentError::unknown_agent("ghost");
        assert_eq!(err.to_string(), "no agent instance registered for 'ghost'");
        assert!(!err.is_remote());
    }
}
