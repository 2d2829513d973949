//! Binding-based routing of inbound messages to agents
//!
//! Bindings are ranked once at construction so the most targeted rule is
//! evaluated first: peer+account > peer > account > channel. The first match
//! wins; when nothing matches the default agent handles the message.

use serde::{Deserialize, Serialize};
use tracing::debug;

const PEER_SCORE: u32 = 100;
const ACCOUNT_SCORE: u32 = 10;
const CHANNEL_SCORE: u32 = 1;

/// Kind of conversation partner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    Dm,
    Group,
}

/// Specific chat a binding is pinned to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerMatch {
    pub kind: PeerKind,
    pub id: String,
}

/// Match pattern of a binding. `channel` is always required.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingMatch {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerMatch>,
}

/// Declarative rule mapping a channel/account/peer pattern to an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    pub agent_id: String,
    #[serde(rename = "match")]
    pub matcher: BindingMatch,
}

impl Binding {
    pub fn channel(agent_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            matcher: BindingMatch {
                channel: channel.into(),
                account_id: None,
                peer: None,
            },
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.matcher.account_id = Some(account_id.into());
        self
    }

    pub fn with_peer(mut self, kind: PeerKind, id: impl Into<String>) -> Self {
        self.matcher.peer = Some(PeerMatch {
            kind,
            id: id.into(),
        });
        self
    }

    /// Specificity score used to order bindings
    pub fn score(&self) -> u32 {
        let mut score = CHANNEL_SCORE;
        if self.matcher.peer.is_some() {
            score += PEER_SCORE;
        }
        if self.matcher.account_id.is_some() {
            score += ACCOUNT_SCORE;
        }
        score
    }

    /// Level a successful match of this binding is reported at
    pub fn level(&self) -> MatchLevel {
        if self.matcher.peer.is_some() {
            MatchLevel::Peer
        } else if self.matcher.account_id.is_some() {
            MatchLevel::Account
        } else {
            MatchLevel::Channel
        }
    }

    pub fn matches(&self, ctx: &RoutingContext) -> bool {
        let m = &self.matcher;
        if m.channel != ctx.channel {
            return false;
        }
        if let Some(peer) = &m.peer {
            let (Some(peer_id), Some(peer_kind)) = (&ctx.peer_id, ctx.peer_kind) else {
                return false;
            };
            if peer.id != *peer_id || peer.kind != peer_kind {
                return false;
            }
        }
        match &m.account_id {
            Some(account) => ctx.account_id.as_deref() == Some(account.as_str()),
            None => true,
        }
    }
}

/// Channel/account/peer facts extracted from one inbound message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingContext {
    pub channel: String,
    pub account_id: Option<String>,
    pub peer_id: Option<String>,
    pub peer_kind: Option<PeerKind>,
}

impl RoutingContext {
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_peer(mut self, kind: PeerKind, id: impl Into<String>) -> Self {
        self.peer_kind = Some(kind);
        self.peer_id = Some(id.into());
        self
    }
}

/// Which tier of binding produced a routing decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchLevel {
    Peer,
    Account,
    Channel,
    Default,
}

impl std::fmt::Display for MatchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peer => write!(f, "peer"),
            Self::Account => write!(f, "account"),
            Self::Channel => write!(f, "channel"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Outcome of one routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingResult<'a> {
    pub agent_id: &'a str,
    pub matched_binding: Option<&'a Binding>,
    pub match_level: MatchLevel,
}

/// Resolves routing contexts to agent ids
#[derive(Debug, Clone)]
pub struct Router {
    bindings: Vec<Binding>,
    default_agent_id: String,
}

impl Router {
    pub fn new(mut bindings: Vec<Binding>, default_agent_id: impl Into<String>) -> Self {
        // stable: equal scores keep declaration order
        bindings.sort_by_key(|b| std::cmp::Reverse(b.score()));
        Self {
            bindings,
            default_agent_id: default_agent_id.into(),
        }
    }

    pub fn route(&self, ctx: &RoutingContext) -> RoutingResult<'_> {
        match self.bindings.iter().find(|b| b.matches(ctx)) {
            Some(binding) => {
                debug!(
                    "Router: {}/{:?}/{:?} -> agent '{}' ({})",
                    ctx.channel,
                    ctx.account_id,
                    ctx.peer_id,
                    binding.agent_id,
                    binding.level()
                );
                RoutingResult {
                    agent_id: &binding.agent_id,
                    matched_binding: Some(binding),
                    match_level: binding.level(),
                }
            }
            None => {
                debug!(
                    "Router: {}/{:?}/{:?} -> default agent '{}'",
                    ctx.channel, ctx.account_id, ctx.peer_id, self.default_agent_id
                );
                RoutingResult {
                    agent_id: &self.default_agent_id,
                    matched_binding: None,
                    match_level: MatchLevel::Default,
                }
            }
        }
    }

    /// Bindings in evaluation order
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn bindings_for<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a Binding> {
        self.bindings.iter().filter(move |b| b.agent_id == agent_id)
    }

    pub fn default_agent_id(&self) -> &str {
        &self.default_agent_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm(channel: &str, peer: &str) -> RoutingContext {
        RoutingContext::channel(channel).with_peer(PeerKind::Dm, peer)
    }

    #[test]
    fn test_scores() {
        assert_eq!(Binding::channel("a", "slack").score(), 1);
        assert_eq!(Binding::channel("a", "slack").with_account("w").score(), 11);
        assert_eq!(
            Binding::channel("a", "slack").with_peer(PeerKind::Dm, "u").score(),
            101
        );
        assert_eq!(
            Binding::channel("a", "slack")
                .with_account("w")
                .with_peer(PeerKind::Dm, "u")
                .score(),
            111
        );
    }

    #[test]
    fn test_peer_outranks_channel_regardless_of_order() {
        let router = Router::new(
            vec![
                Binding::channel("general", "telegram"),
                Binding::channel("vip", "telegram").with_peer(PeerKind::Dm, "42"),
            ],
            "main",
        );
        let result = router.route(&dm("telegram", "42"));
        assert_eq!(result.agent_id, "vip");
        assert_eq!(result.match_level, MatchLevel::Peer);

        let result = router.route(&dm("telegram", "7"));
        assert_eq!(result.agent_id, "general");
        assert_eq!(result.match_level, MatchLevel::Channel);
    }

    #[test]
    fn test_default_when_nothing_matches() {
        let router = Router::new(vec![Binding::channel("work", "slack")], "main");
        let result = router.route(&dm("discord", "1"));
        assert_eq!(result.agent_id, "main");
        assert_eq!(result.match_level, MatchLevel::Default);
        assert!(result.matched_binding.is_none());

        let empty = Router::new(Vec::new(), "main");
        assert_eq!(empty.route(&RoutingContext::default()).agent_id, "main");
    }

    #[test]
    fn test_peer_binding_requires_peer_kind_and_id() {
        let router = Router::new(
            vec![Binding::channel("team", "slack").with_peer(PeerKind::Group, "C1")],
            "main",
        );
        // missing peer facts
        assert_eq!(router.route(&RoutingContext::channel("slack")).agent_id, "main");
        // wrong kind
        assert_eq!(router.route(&dm("slack", "C1")).agent_id, "main");
        let group = RoutingContext::channel("slack").with_peer(PeerKind::Group, "C1");
        assert_eq!(router.route(&group).agent_id, "team");
    }

    #[test]
    fn test_peer_with_account_qualifier() {
        let router = Router::new(
            vec![Binding::channel("a", "slack")
                .with_account("work")
                .with_peer(PeerKind::Dm, "u1")],
            "main",
        );
        assert_eq!(router.route(&dm("slack", "u1")).agent_id, "main");
        let ctx = dm("slack", "u1").with_account("work");
        assert_eq!(router.route(&ctx).agent_id, "a");
        let ctx = dm("slack", "u1").with_account("home");
        assert_eq!(router.route(&ctx).agent_id, "main");
    }

    #[test]
    fn test_account_outranks_channel() {
        let router = Router::new(
            vec![
                Binding::channel("any", "discord"),
                Binding::channel("acct", "discord").with_account("bot2"),
            ],
            "main",
        );
        let ctx = RoutingContext::channel("discord").with_account("bot2");
        let result = router.route(&ctx);
        assert_eq!(result.agent_id, "acct");
        assert_eq!(result.match_level, MatchLevel::Account);

        let ctx = RoutingContext::channel("discord").with_account("bot1");
        assert_eq!(router.route(&ctx).agent_id, "any");
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let router = Router::new(
            vec![
                Binding::channel("first", "signal"),
                Binding::channel("second", "signal"),
            ],
            "main",
        );
        assert_eq!(router.route(&RoutingContext::channel("signal")).agent_id, "first");
        assert_eq!(router.bindings()[0].agent_id, "first");
    }

    #[test]
    fn test_no_fall_through_after_first_match() {
        // the peer binding matches and wins; the channel binding is never consulted
        let router = Router::new(
            vec![
                Binding::channel("chan", "telegram"),
                Binding::channel("peer", "telegram").with_peer(PeerKind::Group, "g"),
            ],
            "main",
        );
        let ctx = RoutingContext::channel("telegram").with_peer(PeerKind::Group, "g");
        let result = router.route(&ctx);
        assert_eq!(result.matched_binding.map(|b| b.agent_id.as_str()), Some("peer"));
        assert_eq!(router.bindings_for("chan").count(), 1);
    }

    #[test]
    fn test_binding_deserialize_match_key() {
        let binding: Binding = serde_json::from_value(serde_json::json!({
            "agent_id": "ops",
            "match": { "channel": "slack", "peer": { "kind": "group", "id": "C9" } }
        }))
        .unwrap();
        assert_eq!(binding.level(), MatchLevel::Peer);
        assert_eq!(binding.matcher.peer.unwrap().kind, PeerKind::Group);
    }
}
