//! Periodic heartbeat trigger
//!
//! Wakes an agent on a fixed interval. In `deliver` mode the reply is sent
//! to the chat the agent last heard from; in `silent` mode it is only logged.

use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::types::{OutboundMessage, OutputMode, TriggerContext, TriggerType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;

#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub prompt: String,
    pub output_mode: OutputMode,
    /// Agent to wake; the default agent when unset
    pub agent: Option<String>,
}

pub struct HeartbeatService {
    gateway: Arc<Gateway>,
    settings: HeartbeatSettings,
}

impl HeartbeatService {
    pub fn new(gateway: Arc<Gateway>, settings: HeartbeatSettings) -> Self {
        Self { gateway, settings }
    }

    /// Run one heartbeat. Returns whether a reply was delivered to a chat.
    pub async fn beat(&self) -> Result<bool> {
        let manager = self.gateway.manager();
        let agent = match &self.settings.agent {
            Some(id) => manager
                .get(id)
                .ok_or_else(|| anyhow!("heartbeat agent '{}' is not configured", id))?,
            None => manager.default_agent(),
        };

        let target = agent.last_message_target();
        let mut trigger = TriggerContext::new(TriggerType::Heartbeat)
            .with_output_mode(self.settings.output_mode);
        trigger.notify_target = target.clone();

        let reply = agent.send_to_agent(&self.settings.prompt, trigger).await?;
        debug!("Heartbeat reply from '{}': {} chars", agent.id(), reply.len());

        if self.settings.output_mode == OutputMode::Silent || reply.trim().is_empty() {
            return Ok(false);
        }
        let Some(target) = target else {
            debug!("Heartbeat for '{}' has no chat to deliver to", agent.id());
            return Ok(false);
        };
        let adapter = self
            .gateway
            .adapter(&target.channel, target.account_id.as_deref())
            .ok_or_else(|| anyhow!("no adapter for heartbeat target {}", target.channel))?;
        adapter
            .send_message(OutboundMessage::new(&target.chat_id, reply))
            .await?;
        Ok(true)
    }

    /// Beat on the configured interval until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Heartbeat every {}s ({:?})",
            self.settings.interval.as_secs(),
            self.settings.output_mode
        );
        let mut ticker = tokio::time::interval(self.settings.interval);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!("Heartbeat failed: {}", e);
                    }
                }
            }
        }
        debug!("Heartbeat stopped");
    }
}
