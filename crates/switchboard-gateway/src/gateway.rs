//! Gateway: adapters in, routed agent work out

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use switchboard_channels::AdapterRegistry;
use switchboard_core::agents::{AgentManager, ManagerStatus};
use switchboard_core::channel::{AdapterKey, ChannelAdapter};
use switchboard_core::error::AgentError;
use switchboard_core::routing::{PeerKind, Router, RoutingContext};
use switchboard_core::types::{InboundMessage, OutboundMessage};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Routing facts for one inbound message: the chat is the peer
pub fn routing_context(msg: &InboundMessage) -> RoutingContext {
    let kind = if msg.is_group {
        PeerKind::Group
    } else {
        PeerKind::Dm
    };
    let ctx = RoutingContext::channel(&msg.channel).with_peer(kind, &msg.chat_id);
    match &msg.account_id {
        Some(account) => ctx.with_account(account),
        None => ctx,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub adapters: Vec<String>,
    pub bindings: usize,
    pub dispatched: u64,
    pub agents: ManagerStatus,
}

/// Connects channel adapters to agent instances through the router
pub struct Gateway {
    registry: AdapterRegistry,
    manager: Arc<AgentManager>,
    router: Router,
    inbound: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    dispatched: AtomicU64,
    started_at: DateTime<Utc>,
}

impl Gateway {
    pub fn new(manager: Arc<AgentManager>, router: Router) -> Self {
        for binding in router.bindings() {
            if manager.get(&binding.agent_id).is_none() {
                warn!(
                    "Binding for channel '{}' targets unknown agent '{}'",
                    binding.matcher.channel, binding.agent_id
                );
            }
        }
        let mut registry = AdapterRegistry::new(256);
        let inbound = registry.take_receiver();
        Self {
            registry,
            manager,
            router,
            inbound: Mutex::new(inbound),
            dispatched: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    /// Register an adapter; must happen before `start`
    pub fn register_adapter(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.registry.register(adapter);
    }

    pub fn adapter(&self, channel: &str, account_id: Option<&str>) -> Option<Arc<dyn ChannelAdapter>> {
        self.registry.get(channel, account_id)
    }

    pub fn adapter_keys(&self) -> Vec<AdapterKey> {
        self.registry.keys()
    }

    pub fn manager(&self) -> &Arc<AgentManager> {
        &self.manager
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Reconcile stored identities with the platform, then start every
    /// adapter. Returns how many adapters started.
    pub async fn start(&self) -> usize {
        let reset = self.manager.verify_agents().await;
        if reset > 0 {
            info!("{} agent(s) reset after verification", reset);
        }
        let found = self.manager.discover_agents_by_name().await;
        if found > 0 {
            info!("{} agent(s) bound by name", found);
        }
        let started = self.registry.start_all().await;
        info!(
            "Gateway started: {}/{} adapter(s), {} agent(s)",
            started,
            self.registry.len(),
            self.manager.count()
        );
        started
    }

    pub async fn stop(&self) {
        self.registry.stop_all().await;
        info!("Gateway stopped");
    }

    /// Route one inbound message and hand it to its agent.
    ///
    /// The message is enqueued before this returns; the returned task waits
    /// for processing to finish so agents progress independently.
    pub fn dispatch(&self, msg: InboundMessage) -> Option<JoinHandle<()>> {
        let Some(adapter) = self.adapter(&msg.channel, msg.account_id.as_deref()) else {
            warn!(
                "No adapter for {}:{:?}, dropping message",
                msg.channel, msg.account_id
            );
            return None;
        };
        self.dispatched.fetch_add(1, Ordering::SeqCst);

        let ctx = routing_context(&msg);
        let route = self.router.route(&ctx);
        let agent_id = route.agent_id.to_string();
        debug!(
            "Routed {} message in {} to '{}' ({})",
            msg.channel, msg.chat_id, agent_id, route.match_level
        );

        let Some(agent) = self.manager.get(&agent_id) else {
            let err = AgentError::unknown_agent(&agent_id);
            error!("{}", err);
            let notice = OutboundMessage::new(&msg.chat_id, format!("Error: {}", err));
            return Some(tokio::spawn(async move {
                if let Err(e) = adapter.send_message(notice).await {
                    warn!("Failed to report routing error: {}", e);
                }
            }));
        };

        let pending = agent.process_message(msg, adapter);
        Some(tokio::spawn(async move {
            if let Err(e) = pending.await {
                debug!("Agent '{}' message failed: {}", agent_id, e);
            }
        }))
    }

    /// Dispatch inbound messages until cancelled or every adapter is gone
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut inbound = self
            .inbound
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("gateway dispatch loop already running"))?;
        info!("Gateway dispatch loop running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Gateway dispatch loop cancelled");
                    break;
                }
                msg = inbound.recv() => {
                    match msg {
                        Some(msg) => {
                            self.dispatch(msg);
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            adapters: self.adapter_keys().iter().map(|k| k.to_string()).collect(),
            bindings: self.router.bindings().len(),
            dispatched: self.dispatched.load(Ordering::SeqCst),
            agents: self.manager.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use switchboard_core::agents::{AgentConfig, AgentState, InstanceSettings, StateStore};
    use switchboard_core::routing::Binding;
    use switchboard_core::testing::{MockAdapter, MockPlatform};

    fn manager(platform: &MockPlatform, dir: &Path) -> Arc<AgentManager> {
        let configs = vec![AgentConfig::new("main", "Main"), AgentConfig::new("work", "Work")];
        Arc::new(
            AgentManager::new(
                configs,
                Arc::new(platform.clone()),
                dir,
                InstanceSettings::default(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_routing_context_from_message() {
        let mut msg = InboundMessage::direct("slack", "C42", "u1", "hi");
        msg.account_id = Some("work".to_string());
        msg.is_group = true;
        let ctx = routing_context(&msg);
        assert_eq!(ctx.channel, "slack");
        assert_eq!(ctx.account_id.as_deref(), Some("work"));
        assert_eq!(ctx.peer_kind, Some(PeerKind::Group));
        assert_eq!(ctx.peer_id.as_deref(), Some("C42"));
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_binding() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let router = Router::new(vec![Binding::channel("work", "slack")], "main");
        let mut gateway = Gateway::new(manager(&platform, dir.path()), router);
        let slack = Arc::new(MockAdapter::new("slack"));
        let telegram = Arc::new(MockAdapter::new("telegram"));
        gateway.register_adapter(slack.clone());
        gateway.register_adapter(telegram.clone());

        gateway
            .dispatch(InboundMessage::direct("slack", "C1", "u1", "from slack"))
            .unwrap()
            .await
            .unwrap();
        gateway
            .dispatch(InboundMessage::direct("telegram", "T1", "u2", "from tg"))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(slack.sent_texts(), vec!["ok".to_string()]);
        assert_eq!(telegram.sent_texts(), vec!["ok".to_string()]);
        assert_eq!(platform.count_calls("create_agent:Work"), 1);
        assert_eq!(platform.count_calls("create_agent:Main"), 1);
        assert_eq!(gateway.status().dispatched, 2);
    }

    #[tokio::test]
    async fn test_unknown_agent_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let router = Router::new(vec![Binding::channel("ghost", "telegram")], "main");
        let mut gateway = Gateway::new(manager(&platform, dir.path()), router);
        let telegram = Arc::new(MockAdapter::new("telegram"));
        gateway.register_adapter(telegram.clone());

        gateway
            .dispatch(InboundMessage::direct("telegram", "T1", "u", "hi"))
            .unwrap()
            .await
            .unwrap();

        let sent = telegram.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Error: "));
        assert!(sent[0].contains("ghost"));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_message_without_adapter_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::new(
            manager(&MockPlatform::new(), dir.path()),
            Router::new(Vec::new(), "main"),
        );
        assert!(
            gateway
                .dispatch(InboundMessage::direct("signal", "s", "u", "hi"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_start_verifies_then_starts_adapters() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        platform.add_agent("Work", "agent-work");
        StateStore::for_agent(dir.path(), "main").save(&AgentState {
            agent_id: Some("agent-deleted".to_string()),
            ..AgentState::default()
        });
        let mut gateway = Gateway::new(
            manager(&platform, dir.path()),
            Router::new(Vec::new(), "main"),
        );
        let good = Arc::new(MockAdapter::new("telegram"));
        let bad = Arc::new(MockAdapter::new("slack").failing_start());
        gateway.register_adapter(good.clone());
        gateway.register_adapter(bad.clone());

        assert_eq!(gateway.start().await, 1);

        let mgr = gateway.manager();
        assert!(mgr.get("main").unwrap().agent_id().is_none());
        assert_eq!(mgr.get("work").unwrap().agent_id().as_deref(), Some("agent-work"));

        gateway.stop().await;
        assert!(good.stopped.load(Ordering::SeqCst));
        assert!(bad.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_dispatches_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let mut gateway = Gateway::new(
            manager(&platform, dir.path()),
            Router::new(Vec::new(), "main"),
        );
        let adapter = Arc::new(MockAdapter::new("telegram"));
        gateway.register_adapter(adapter.clone());
        let gateway = Arc::new(gateway);
        gateway.start().await;

        let cancel = CancellationToken::new();
        let loop_task = tokio::spawn({
            let gateway = gateway.clone();
            let cancel = cancel.clone();
            async move { gateway.run(cancel).await }
        });

        adapter
            .receive(InboundMessage::direct("telegram", "T1", "u", "hello"))
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while adapter.sent_texts().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reply delivered");

        cancel.cancel();
        loop_task.await.unwrap().unwrap();
        assert_eq!(adapter.sent_texts(), vec!["ok".to_string()]);
        assert!(gateway.run(CancellationToken::new()).await.is_err());
    }
}
