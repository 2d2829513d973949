//! In-memory platform and channel doubles for tests

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

use crate::channel::ChannelAdapter;
use crate::platform::{
    AgentPlatform, AgentSession, CreateAgentOptions, SessionOptions, SessionTarget, StreamEvent,
};
use crate::types::{InboundMessage, OutboundMessage, SentMessage};

#[derive(Default)]
struct PlatformState {
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    /// name -> remote agent id
    agents: Mutex<HashMap<String, String>>,
    stale_conversations: Mutex<HashSet<String>>,
    fail_all_init: AtomicBool,
    fail_sends: AtomicUsize,
    reply: Mutex<Vec<String>>,
    chunk_delay: Mutex<Option<Duration>>,
    send_delay: Mutex<Option<Duration>>,
    init_delay: Mutex<Option<Duration>>,
    run_error: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    unreachable: AtomicBool,
}

impl PlatformState {
    fn log(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn next(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Scriptable remote platform that records every call
#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<PlatformState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call in order, e.g. `create_agent:Main`, `send:agent-1:<text>`
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Register an agent that already exists remotely
    pub fn add_agent(&self, name: &str, id: &str) {
        self.state
            .agents
            .lock()
            .unwrap()
            .insert(name.to_string(), id.to_string());
    }

    /// Initializing a session for this conversation fails
    pub fn expire_conversation(&self, conversation_id: &str) {
        self.state
            .stale_conversations
            .lock()
            .unwrap()
            .insert(conversation_id.to_string());
    }

    pub fn fail_all_initialize(&self) {
        self.state.fail_all_init.store(true, Ordering::SeqCst);
    }

    /// The next `n` sends fail
    pub fn fail_sends(&self, n: usize) {
        self.state.fail_sends.store(n, Ordering::SeqCst);
    }

    pub fn set_reply(&self, chunks: &[&str]) {
        *self.state.reply.lock().unwrap() = chunks.iter().map(|c| c.to_string()).collect();
    }

    pub fn set_chunk_delay(&self, delay: Duration) {
        *self.state.chunk_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.state.send_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_initialize_delay(&self, delay: Duration) {
        *self.state.init_delay.lock().unwrap() = Some(delay);
    }

    /// Runs end with an unsuccessful result and no assistant text
    pub fn fail_runs(&self, error: &str) {
        *self.state.run_error.lock().unwrap() = Some(error.to_string());
    }

    /// Sends block until the returned handle is notified
    pub fn gate_sends(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.state.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    /// Existence checks fail with a transport error
    pub fn set_unreachable(&self) {
        self.state.unreachable.store(true, Ordering::SeqCst);
    }

    fn open(&self, kind: &str, target: &SessionTarget, options: &SessionOptions) -> MockSession {
        self.state.log(format!("{}:{}", kind, target));
        let (agent_id, conversation_id) = match target {
            SessionTarget::Agent(id) if kind == "create_session" => {
                (id.clone(), Some(self.state.next("conv")))
            }
            // the agent's default conversation
            SessionTarget::Agent(id) => (id.clone(), Some(format!("{}-default", id))),
            SessionTarget::Conversation(c) => (
                options.agent_id.clone().unwrap_or_default(),
                Some(c.clone()),
            ),
        };
        let fail_init = self.state.fail_all_init.load(Ordering::SeqCst)
            || conversation_id
                .as_ref()
                .is_some_and(|c| self.state.stale_conversations.lock().unwrap().contains(c));
        MockSession {
            state: self.state.clone(),
            agent_id,
            conversation_id,
            fail_init,
            events: VecDeque::new(),
        }
    }
}

#[async_trait]
impl AgentPlatform for MockPlatform {
    async fn create_agent(&self, options: &CreateAgentOptions) -> Result<String> {
        self.state.log(format!("create_agent:{}", options.name));
        let id = self.state.next("agent");
        self.add_agent(&options.name, &id);
        Ok(id)
    }

    async fn create_session(
        &self,
        target: &SessionTarget,
        options: &SessionOptions,
    ) -> Result<Box<dyn AgentSession>> {
        Ok(Box::new(self.open("create_session", target, options)))
    }

    async fn resume_session(
        &self,
        target: &SessionTarget,
        options: &SessionOptions,
    ) -> Result<Box<dyn AgentSession>> {
        Ok(Box::new(self.open("resume_session", target, options)))
    }

    async fn agent_exists(&self, agent_id: &str) -> Result<bool> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(self
            .state
            .agents
            .lock()
            .unwrap()
            .values()
            .any(|id| id == agent_id))
    }

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state.agents.lock().unwrap().get(name).cloned())
    }

    async fn rename_agent(&self, agent_id: &str, name: &str) -> Result<()> {
        self.state.log(format!("rename:{}:{}", agent_id, name));
        Ok(())
    }

    fn base_url(&self) -> Option<&str> {
        Some("http://mock.local")
    }
}

/// Session handed out by [`MockPlatform`]
pub struct MockSession {
    state: Arc<PlatformState>,
    agent_id: String,
    conversation_id: Option<String>,
    fail_init: bool,
    events: VecDeque<StreamEvent>,
}

#[async_trait]
impl AgentSession for MockSession {
    async fn initialize(&mut self) -> Result<()> {
        let delay = *self.state.init_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_init {
            return Err(anyhow!("conversation not found"));
        }
        Ok(())
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let failing = self
            .state
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.state.log(format!("send_failed:{}", self.agent_id));
            return Err(anyhow!("transport closed"));
        }
        self.state.log(format!("send:{}:{}", self.agent_id, text));
        let delay = *self.state.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let gate = self.state.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let run_error = self.state.run_error.lock().unwrap().clone();
        if let Some(error) = run_error {
            self.events = VecDeque::from([StreamEvent::Result {
                success: false,
                agent_id: Some(self.agent_id.clone()),
                conversation_id: self.conversation_id.clone(),
                error: Some(error),
            }]);
            return Ok(());
        }
        let mut reply = self.state.reply.lock().unwrap().clone();
        if reply.is_empty() {
            reply.push("ok".to_string());
        }
        self.events = reply.into_iter().map(StreamEvent::AssistantText).collect();
        self.events.push_back(StreamEvent::Other);
        self.events.push_back(StreamEvent::Result {
            success: true,
            agent_id: Some(self.agent_id.clone()),
            conversation_id: self.conversation_id.clone(),
            error: None,
        });
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        let delay = *self.state.chunk_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let event = self.events.pop_front();
        if matches!(event, Some(StreamEvent::Result { .. })) {
            self.state.log(format!("done:{}", self.agent_id));
        }
        Ok(event)
    }

    async fn close(&mut self) {
        self.state.log(format!("close:{}", self.agent_id));
    }
}

/// Channel adapter that records what it was asked to do
pub struct MockAdapter {
    channel: String,
    account_id: Option<String>,
    editing: bool,
    pub sent: Mutex<Vec<(String, String)>>,
    pub edits: Mutex<Vec<(String, String, String)>>,
    pub typing: AtomicUsize,
    fail_sends: AtomicUsize,
    fail_start: bool,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    inbound: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MockAdapter {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            account_id: None,
            editing: false,
            sent: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            typing: AtomicUsize::new(0),
            fail_sends: AtomicUsize::new(0),
            fail_start: false,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            inbound: Mutex::new(None),
        }
    }

    pub fn with_account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn with_editing(mut self) -> Self {
        self.editing = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// The next `n` sends fail
    pub fn fail_sends(&self, n: usize) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn edited_texts(&self) -> Vec<String> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, t)| t.clone())
            .collect()
    }

    /// Push a message as if it arrived from the platform
    pub async fn receive(&self, msg: InboundMessage) -> Result<()> {
        let tx = self
            .inbound
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("adapter not started"))?;
        tx.send(msg).await.map_err(|_| anyhow!("gateway gone"))
    }
}

#[async_trait]
impl ChannelAdapter for MockAdapter {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        if self.fail_start {
            return Err(anyhow!("bad token"));
        }
        *self.inbound.lock().unwrap() = Some(tx);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_start {
            return Err(anyhow!("never started"));
        }
        Ok(())
    }

    async fn send_message(&self, msg: OutboundMessage) -> Result<SentMessage> {
        let failing = self
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("rate limited"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((msg.chat_id, msg.text));
        Ok(SentMessage {
            message_id: format!("m{}", sent.len()),
        })
    }

    async fn edit_message(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()> {
        self.edits.lock().unwrap().push((
            chat_id.to_string(),
            message_id.to_string(),
            text.to_string(),
        ));
        Ok(())
    }

    async fn send_typing_indicator(&self, _chat_id: &str) -> Result<()> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn supports_editing(&self) -> bool {
        self.editing
    }
}
