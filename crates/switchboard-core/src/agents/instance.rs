//! Agent instance: persisted identity, session lifecycle and a serialized
//! work queue
//!
//! Every piece of work for one agent goes through a FIFO drained by a single
//! task, so at most one message per agent talks to the remote platform at a
//! time. Different instances have independent queues and never wait on each
//! other.

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use super::config::AgentConfig;
use super::state::{AgentState, MessageTarget, SessionPhase, StateStore};
use crate::channel::ChannelAdapter;
use crate::conversation::{
    ConversationMode, SHARED_KEY, resolve_conversation_key, resolve_heartbeat_conversation_key,
};
use crate::envelope;
use crate::error::{AgentError, Result};
use crate::platform::{
    AgentPlatform, AgentSession, CreateAgentOptions, SessionOptions, SessionTarget, StreamEvent,
};
use crate::timeout::{REMOTE_OP_TIMEOUT, bounded};
use crate::types::{InboundMessage, OutboundMessage, TriggerContext, TriggerType};

/// Sent when the agent finished without producing any text
pub const NO_RESPONSE_TEXT: &str = "(No response from agent)";

/// Timing knobs for an instance
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    /// Bound on session initialize and send
    pub operation_timeout: Duration,
    /// Minimum gap between in-place edits while streaming
    pub edit_interval: Duration,
    /// Typing indicator refresh period
    pub typing_interval: Duration,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            operation_timeout: REMOTE_OP_TIMEOUT,
            edit_interval: Duration::from_millis(500),
            typing_interval: Duration::from_secs(4),
        }
    }
}

/// Snapshot of an instance for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub id: String,
    pub name: String,
    pub remote_agent_id: Option<String>,
    pub phase: SessionPhase,
    pub conversations: usize,
    pub queued: usize,
    pub processed: u64,
    pub last_used_at: Option<chrono::DateTime<Utc>>,
    pub last_channel: Option<String>,
}

enum Work {
    Inbound {
        msg: InboundMessage,
        adapter: Arc<dyn ChannelAdapter>,
    },
    Trigger {
        text: String,
        trigger: TriggerContext,
    },
}

struct QueueEntry {
    work: Work,
    completion: oneshot::Sender<Result<String>>,
}

/// Chat a streamed reply is rendered into
struct ReplySink<'a> {
    adapter: &'a Arc<dyn ChannelAdapter>,
    chat_id: &'a str,
}

/// An initialized session plus the identity it acts for
struct ActiveSession {
    session: Box<dyn AgentSession>,
    agent_id: String,
    /// Identity generation the session was opened under
    generation: u64,
}

struct StreamOutcome {
    text: String,
    message_id: Option<String>,
}

struct Inner {
    config: AgentConfig,
    platform: Arc<dyn AgentPlatform>,
    store: StateStore,
    state: Mutex<AgentState>,
    settings: InstanceSettings,
    /// Bumped whenever the identity is replaced from outside the queue
    generation: AtomicU64,
    queued: AtomicUsize,
    processed: AtomicU64,
}

/// Owner of one configured agent's identity, sessions and work queue
pub struct AgentInstance {
    inner: Arc<Inner>,
    queue: mpsc::UnboundedSender<QueueEntry>,
}

impl AgentInstance {
    /// Load persisted state and spawn the queue drain task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: AgentConfig, platform: Arc<dyn AgentPlatform>, store: StateStore) -> Self {
        Self::with_settings(config, platform, store, InstanceSettings::default())
    }

    pub fn with_settings(
        config: AgentConfig,
        platform: Arc<dyn AgentPlatform>,
        store: StateStore,
        settings: InstanceSettings,
    ) -> Self {
        let state = store.load();
        info!(
            "Agent '{}' loaded (remote id: {})",
            config.id,
            state.agent_id.as_deref().unwrap_or("none")
        );
        let inner = Arc::new(Inner {
            config,
            platform,
            store,
            state: Mutex::new(state),
            settings,
            generation: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(inner.clone(), rx));
        Self { inner, queue: tx }
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Queue an inbound message.
    ///
    /// The entry is enqueued before this returns; the future resolves once
    /// the reply has been delivered, or with the error that stopped it.
    pub fn process_message(
        &self,
        msg: InboundMessage,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let reply = self.enqueue(Work::Inbound { msg, adapter });
        async move { reply.await.map(|_| ()) }
    }

    /// Send text on behalf of a trigger and return the agent's reply text.
    ///
    /// Shares the queue and session recovery with `process_message` but has
    /// no typing, streaming or delivery side effects.
    pub fn send_to_agent(
        &self,
        text: impl Into<String>,
        trigger: TriggerContext,
    ) -> impl Future<Output = Result<String>> + Send + 'static {
        self.enqueue(Work::Trigger {
            text: text.into(),
            trigger,
        })
    }

    /// Forget the remote identity; the next message creates a new agent.
    ///
    /// A message already in flight keeps running, but the identity it
    /// reports is discarded.
    pub fn reset(&self) {
        let mut state = self.inner.state();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *state = AgentState::default();
        self.inner.store.save(&state);
        info!("Agent '{}' reset", self.inner.config.id);
    }

    /// Bind an identity that already exists on the remote platform
    pub fn set_agent_id(&self, agent_id: impl Into<String>) {
        let agent_id = agent_id.into();
        let mut state = self.inner.state();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        info!("Agent '{}' bound to remote agent {}", self.inner.config.id, agent_id);
        state.agent_id = Some(agent_id);
        self.inner.store.save(&state);
    }

    pub fn agent_id(&self) -> Option<String> {
        self.inner.state().agent_id.clone()
    }

    pub fn state(&self) -> AgentState {
        self.inner.state().clone()
    }

    pub fn last_message_target(&self) -> Option<MessageTarget> {
        self.inner.state().last_message_target.clone()
    }

    pub fn status(&self) -> AgentStatus {
        let state = self.inner.state();
        AgentStatus {
            id: self.inner.config.id.clone(),
            name: self.inner.config.name.clone(),
            remote_agent_id: state.agent_id.clone(),
            phase: state.phase(),
            conversations: state.conversations.len(),
            queued: self.inner.queued.load(Ordering::SeqCst),
            processed: self.inner.processed.load(Ordering::SeqCst),
            last_used_at: state.last_used_at,
            last_channel: state.last_active_channel().map(str::to_string),
        }
    }

    fn enqueue(&self, work: Work) -> impl Future<Output = Result<String>> + Send + 'static {
        let agent = self.inner.config.id.clone();
        let (tx, rx) = oneshot::channel();
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        let pushed = self.queue.send(QueueEntry {
            work,
            completion: tx,
        });
        if pushed.is_err() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
        }
        async move {
            pushed.map_err(|_| AgentError::queue_closed(&agent))?;
            rx.await.map_err(|_| AgentError::queue_closed(&agent))?
        }
    }
}

/// Drain loop: one entry at a time, in arrival order
async fn drain(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<QueueEntry>) {
    while let Some(entry) = rx.recv().await {
        let result = match entry.work {
            Work::Inbound { msg, adapter } => inner.handle_inbound(msg, adapter).await,
            Work::Trigger { text, trigger } => inner.handle_trigger(&text, &trigger).await,
        };
        inner.queued.fetch_sub(1, Ordering::SeqCst);
        inner.processed.fetch_add(1, Ordering::SeqCst);
        // the caller may have stopped waiting
        let _ = entry.completion.send(result);
    }
    debug!("Agent '{}' queue closed", inner.config.id);
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mode(&self) -> Option<ConversationMode> {
        self.config.conversations.mode
    }

    async fn handle_inbound(
        &self,
        msg: InboundMessage,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> Result<String> {
        let key = resolve_conversation_key(
            &msg.channel,
            self.mode(),
            &self.config.conversations.overrides(),
        );
        self.record_target(&msg);
        debug!(
            "Agent '{}' handling {} message from {} (conversation key '{}')",
            self.config.id, msg.channel, msg.user_id, key
        );

        let text = envelope::format_message(&msg);
        let mut active = match self.open_session(&key, &text).await {
            Ok(active) => active,
            Err(e) => {
                error!("Agent '{}' failed to reach remote agent: {}", self.config.id, e);
                let notice = OutboundMessage::new(&msg.chat_id, format!("Error: {}", e));
                if let Err(send_err) = adapter.send_message(notice).await {
                    warn!("Failed to report error to {}: {}", msg.channel, send_err);
                }
                return Err(e);
            }
        };

        let sink = ReplySink {
            adapter: &adapter,
            chat_id: &msg.chat_id,
        };
        let streamed = self.stream_reply(&mut active, &key, Some(&sink)).await;
        let result = match streamed {
            Ok(outcome) => {
                self.deliver(&sink, &outcome).await;
                Ok(outcome.text)
            }
            Err(e) => {
                error!("Agent '{}' reply stream failed: {}", self.config.id, e);
                let notice = OutboundMessage::new(&msg.chat_id, format!("Error: {}", e));
                if let Err(send_err) = adapter.send_message(notice).await {
                    warn!("Failed to report error to {}: {}", msg.channel, send_err);
                }
                Err(e)
            }
        };
        active.session.close().await;
        result
    }

    async fn handle_trigger(&self, text: &str, trigger: &TriggerContext) -> Result<String> {
        let key = self.trigger_key(trigger);
        debug!(
            "Agent '{}' handling {} trigger (conversation key '{}')",
            self.config.id, trigger.trigger_type, key
        );
        let text = envelope::format_trigger(text, trigger);
        let mut active = self.open_session(&key, &text).await?;
        let result = self.stream_reply(&mut active, &key, None).await;
        active.session.close().await;
        result.map(|outcome| outcome.text)
    }

    fn trigger_key(&self, trigger: &TriggerContext) -> String {
        let overrides = self.config.conversations.overrides();
        match trigger.trigger_type {
            TriggerType::Heartbeat => {
                // inbound conversations are stored under the lowercased channel
                let last_active = self.state().last_active_channel().map(str::to_lowercase);
                resolve_heartbeat_conversation_key(
                    self.mode(),
                    &self.config.conversations.heartbeat,
                    &overrides,
                    last_active.as_deref(),
                )
            }
            _ => match &trigger.source_channel {
                Some(channel) => resolve_conversation_key(channel, self.mode(), &overrides),
                None => SHARED_KEY.to_string(),
            },
        }
    }

    fn record_target(&self, msg: &InboundMessage) {
        let mut state = self.state();
        state.last_message_target = Some(MessageTarget {
            channel: msg.channel.clone(),
            account_id: msg.account_id.clone(),
            chat_id: msg.chat_id.clone(),
            message_id: msg.message_id.clone(),
            updated_at: Utc::now(),
        });
        self.store.save(&state);
    }

    fn session_options(&self, agent_id: Option<String>) -> SessionOptions {
        SessionOptions {
            agent_id,
            model: self.config.model.clone(),
            workspace: self.config.workspace.clone(),
            system_prompt: self.config.system_prompt.clone(),
        }
    }

    /// Steps 1-3: pick a session, initialize it and send `text`, recreating
    /// the session once against the stored identity if a resumed one fails.
    async fn open_session(&self, key: &str, text: &str) -> Result<ActiveSession> {
        let (stored_agent, stored_conversation, generation) = {
            let state = self.state();
            (
                state.agent_id.clone(),
                state.conversation_for(key).map(str::to_string),
                self.generation.load(Ordering::SeqCst),
            )
        };

        let mut active = match (&stored_agent, stored_conversation) {
            (Some(agent_id), Some(conversation_id)) => {
                debug!("Resuming conversation {} for key '{}'", conversation_id, key);
                let target = SessionTarget::Conversation(conversation_id);
                match self.establish(&target, agent_id, generation, false).await {
                    Ok(active) => active,
                    Err(e) => self.recreate(agent_id, generation, &e).await?,
                }
            }
            (Some(agent_id), None) => {
                debug!("Resuming default conversation of {}", agent_id);
                let target = SessionTarget::Agent(agent_id.clone());
                match self.establish(&target, agent_id, generation, false).await {
                    Ok(active) => active,
                    Err(e) => self.recreate(agent_id, generation, &e).await?,
                }
            }
            (None, _) => {
                let agent_id = self.create_remote_agent().await?;
                let target = SessionTarget::Agent(agent_id.clone());
                self.establish(&target, &agent_id, generation, true).await?
            }
        };

        let timeout = self.settings.operation_timeout;
        if let Err(e) = bounded("send", timeout, active.session.send(text)).await {
            active.session.close().await;
            let Some(agent_id) = &stored_agent else {
                return Err(e);
            };
            active = self.recreate(agent_id, generation, &e).await?;
            if let Err(e) = bounded("send", timeout, active.session.send(text)).await {
                active.session.close().await;
                return Err(e);
            }
        }
        Ok(active)
    }

    /// Open (create or resume) and initialize; the session is closed again if
    /// initialization fails.
    async fn establish(
        &self,
        target: &SessionTarget,
        agent_id: &str,
        generation: u64,
        create: bool,
    ) -> Result<ActiveSession> {
        let options = self.session_options(Some(agent_id.to_string()));
        let opened = if create {
            self.platform.create_session(target, &options).await
        } else {
            self.platform.resume_session(target, &options).await
        };
        let mut session = opened.map_err(AgentError::Remote)?;
        if let Err(e) = bounded(
            "initialize",
            self.settings.operation_timeout,
            session.initialize(),
        )
        .await
        {
            session.close().await;
            return Err(e);
        }
        Ok(ActiveSession {
            session,
            agent_id: agent_id.to_string(),
            generation,
        })
    }

    /// The stored conversation is gone but the identity is still valid:
    /// start a fresh conversation for it.
    async fn recreate(
        &self,
        agent_id: &str,
        generation: u64,
        cause: &AgentError,
    ) -> Result<ActiveSession> {
        warn!(
            "Agent '{}' session failed ({}), creating a new session for {}",
            self.config.id, cause, agent_id
        );
        let target = SessionTarget::Agent(agent_id.to_string());
        self.establish(&target, agent_id, generation, true).await
    }

    async fn create_remote_agent(&self) -> Result<String> {
        info!("Creating remote agent for '{}'", self.config.id);
        let options = CreateAgentOptions {
            name: self.config.name.clone(),
            model: self.config.model.clone(),
            system_prompt: self.config.system_prompt.clone(),
            memory: self.config.memory.clone(),
        };
        let agent_id = self
            .platform
            .create_agent(&options)
            .await
            .map_err(AgentError::Remote)?;
        info!("Created remote agent {} for '{}'", agent_id, self.config.id);
        Ok(agent_id)
    }

    /// Step 4: read the reply stream, pushing throttled in-place updates and
    /// persisting the identifiers from the result event.
    async fn stream_reply(
        &self,
        active: &mut ActiveSession,
        key: &str,
        sink: Option<&ReplySink<'_>>,
    ) -> Result<StreamOutcome> {
        let editing = sink.is_some_and(|s| s.adapter.supports_editing());
        let _typing = sink.map(|s| {
            spawn_typing(
                s.adapter.clone(),
                s.chat_id.to_string(),
                self.settings.typing_interval,
            )
        });

        let mut outcome = StreamOutcome {
            text: String::new(),
            message_id: None,
        };
        let mut last_push = Instant::now();
        let mut persisted = false;

        while let Some(event) = active
            .session
            .next_event()
            .await
            .map_err(AgentError::Remote)?
        {
            match event {
                StreamEvent::AssistantText(chunk) => {
                    outcome.text.push_str(&chunk);
                    if let Some(sink) = sink.filter(|_| editing) {
                        if last_push.elapsed() >= self.settings.edit_interval
                            && !outcome.text.trim().is_empty()
                        {
                            push_update(sink, &mut outcome).await;
                            last_push = Instant::now();
                        }
                    }
                }
                StreamEvent::Result {
                    success,
                    agent_id,
                    conversation_id,
                    error,
                } => {
                    let agent_id = agent_id.unwrap_or_else(|| active.agent_id.clone());
                    self.persist_result(key, &agent_id, conversation_id, active.generation)
                        .await;
                    persisted = true;
                    if !success {
                        let reason = error.unwrap_or_else(|| "agent run failed".to_string());
                        if outcome.text.trim().is_empty() {
                            return Err(AgentError::Remote(anyhow::anyhow!(reason)));
                        }
                        warn!("Agent '{}' run ended with error: {}", self.config.id, reason);
                    }
                    break;
                }
                StreamEvent::Other => {}
            }
        }

        if !persisted {
            let agent_id = active.agent_id.clone();
            self.persist_result(key, &agent_id, None, active.generation)
                .await;
        }
        Ok(outcome)
    }

    async fn persist_result(
        &self,
        key: &str,
        agent_id: &str,
        conversation_id: Option<String>,
        generation: u64,
    ) {
        let first_identity = {
            let mut state = self.state();
            if self.generation.load(Ordering::SeqCst) != generation {
                info!(
                    "Agent '{}' identity changed while a message was in flight; not storing {}",
                    self.config.id, agent_id
                );
                return;
            }
            let first = state.agent_id.is_none();
            if state.agent_id.as_deref() != Some(agent_id) {
                // a different identity invalidates every stored conversation
                state.conversations.clear();
                state.conversation_id = None;
            }
            state.agent_id = Some(agent_id.to_string());
            if let Some(conversation_id) = conversation_id {
                state.set_conversation(key, conversation_id);
            }
            if let Some(base_url) = self.platform.base_url() {
                state.base_url = Some(base_url.to_string());
            }
            let now = Utc::now();
            state.created_at.get_or_insert(now);
            state.last_used_at = Some(now);
            self.store.save(&state);
            first
        };

        if first_identity {
            info!("Agent '{}' is remote agent {}", self.config.id, agent_id);
            if let Err(e) = self.platform.rename_agent(agent_id, &self.config.name).await {
                warn!("Failed to set display name for {}: {}", agent_id, e);
            }
        }
    }

    /// Step 5: deliver the final text, editing in place when possible
    async fn deliver(&self, sink: &ReplySink<'_>, outcome: &StreamOutcome) {
        let text = if outcome.text.trim().is_empty() {
            NO_RESPONSE_TEXT
        } else {
            outcome.text.as_str()
        };
        let attempt = match &outcome.message_id {
            Some(message_id) if sink.adapter.supports_editing() => {
                sink.adapter
                    .edit_message(sink.chat_id, message_id, text)
                    .await
            }
            _ => sink
                .adapter
                .send_message(OutboundMessage::new(sink.chat_id, text))
                .await
                .map(|_| ()),
        };
        let Err(e) = attempt else {
            return;
        };
        if outcome.message_id.is_some() {
            error!("Agent '{}' failed to update final reply: {}", self.config.id, e);
            return;
        }
        warn!("Agent '{}' reply delivery failed, retrying: {}", self.config.id, e);
        if let Err(e) = sink
            .adapter
            .send_message(OutboundMessage::new(sink.chat_id, text))
            .await
        {
            error!("Agent '{}' reply lost: {}", self.config.id, e);
        }
    }
}

/// Create the visible message on the first update, edit it afterwards
async fn push_update(sink: &ReplySink<'_>, outcome: &mut StreamOutcome) {
    match &outcome.message_id {
        None => {
            match sink
                .adapter
                .send_message(OutboundMessage::new(sink.chat_id, outcome.text.clone()))
                .await
            {
                Ok(sent) => outcome.message_id = Some(sent.message_id),
                Err(e) => debug!("Streaming update failed: {}", e),
            }
        }
        Some(message_id) => {
            if let Err(e) = sink
                .adapter
                .edit_message(sink.chat_id, message_id, &outcome.text)
                .await
            {
                debug!("Streaming edit failed: {}", e);
            }
        }
    }
}

/// Refresh the typing indicator until the returned guard is dropped
fn spawn_typing(adapter: Arc<dyn ChannelAdapter>, chat_id: String, every: Duration) -> DropGuard {
    let token = CancellationToken::new();
    let cancelled = token.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancelled.cancelled() => break,
                        _ = adapter.send_typing_indicator(&chat_id) => {}
                    }
                }
            }
        }
    });
    token.drop_guard()
}
