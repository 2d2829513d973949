//! REST client for the remote agent platform
//!
//! Replies are streamed as server-sent events: `data: {json}` lines, one
//! event per line, terminated by `data: [DONE]`.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{
    AgentPlatform, AgentSession, CreateAgentOptions, SessionOptions, SessionTarget, StreamEvent,
};

#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    /// Whole-request bound for everything except reply streams
    timeout: Duration,
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(self.url(path)))
            .timeout(self.timeout)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(self.url(path)))
            .timeout(self.timeout)
    }

    fn patch(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.patch(self.url(path)))
            .timeout(self.timeout)
    }

    /// No request timeout: a reply stream may legitimately outlive it
    fn post_stream(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(self.url(path)))
    }
}

/// Fail with the response body when the status is not a success
async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(anyhow!("{} failed with status {}: {}", what, status, error_text))
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AgentSummary {
    id: String,
    name: String,
}

/// HTTP implementation of [`AgentPlatform`]
#[derive(Clone)]
pub struct HttpPlatform {
    endpoint: Endpoint,
}

impl std::fmt::Debug for HttpPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked_key = self.endpoint.api_key.as_ref().map(|key| {
            if key.len() > 7 {
                format!("{}...{}", &key[..3], &key[key.len() - 4..])
            } else {
                "***".to_string()
            }
        });
        f.debug_struct("HttpPlatform")
            .field("client", &"<reqwest::Client>")
            .field("base_url", &self.endpoint.base_url)
            .field("api_key", &masked_key)
            .finish()
    }
}

impl HttpPlatform {
    /// `timeout` bounds connecting and every plain request end to end;
    /// streaming replies are bounded by the caller.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .with_context(|| format!("Invalid platform URL: {}", base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("Platform URL must be http(s): {}", base_url));
        }
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            endpoint: Endpoint {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: api_key.filter(|k| !k.is_empty()),
                timeout,
            },
        })
    }

    fn session(&self, route: StreamRoute, options: &SessionOptions) -> Box<dyn AgentSession> {
        Box::new(HttpSession {
            endpoint: self.endpoint.clone(),
            route,
            overrides: RunOverrides::from(options),
            response: None,
            buffer: Vec::new(),
            finished: false,
        })
    }

    fn route_for(target: &SessionTarget, options: &SessionOptions) -> StreamRoute {
        match target {
            SessionTarget::Agent(id) => StreamRoute::Agent(id.clone()),
            SessionTarget::Conversation(id) => StreamRoute::Conversation {
                id: id.clone(),
                agent_id: options.agent_id.clone(),
            },
        }
    }
}

#[async_trait]
impl AgentPlatform for HttpPlatform {
    async fn create_agent(&self, options: &CreateAgentOptions) -> Result<String> {
        let body = serde_json::json!({
            "name": options.name,
            "model": options.model,
            "system": options.system_prompt,
            "memory_blocks": options.memory,
        });
        let response = self
            .endpoint
            .post("/v1/agents")
            .json(&body)
            .send()
            .await
            .context("Failed to send create-agent request")?;
        let created: IdResponse = ensure_success(response, "Create agent")
            .await?
            .json()
            .await
            .context("Failed to parse create-agent response")?;
        Ok(created.id)
    }

    async fn create_session(
        &self,
        target: &SessionTarget,
        options: &SessionOptions,
    ) -> Result<Box<dyn AgentSession>> {
        let SessionTarget::Agent(agent_id) = target else {
            return Ok(self.session(Self::route_for(target, options), options));
        };
        let response = self
            .endpoint
            .post("/v1/conversations")
            .json(&serde_json::json!({ "agent_id": agent_id }))
            .send()
            .await
            .context("Failed to send create-conversation request")?;
        let created: IdResponse = ensure_success(response, "Create conversation")
            .await?
            .json()
            .await
            .context("Failed to parse create-conversation response")?;
        debug!("Created conversation {} for {}", created.id, agent_id);
        Ok(self.session(
            StreamRoute::Conversation {
                id: created.id,
                agent_id: Some(agent_id.clone()),
            },
            options,
        ))
    }

    async fn resume_session(
        &self,
        target: &SessionTarget,
        options: &SessionOptions,
    ) -> Result<Box<dyn AgentSession>> {
        Ok(self.session(Self::route_for(target, options), options))
    }

    async fn agent_exists(&self, agent_id: &str) -> Result<bool> {
        let response = self
            .endpoint
            .get(&format!("/v1/agents/{}", agent_id))
            .send()
            .await
            .context("Failed to reach agent platform")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response, "Get agent").await?;
        Ok(true)
    }

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<String>> {
        let response = self
            .endpoint
            .get("/v1/agents")
            .query(&[("name", name)])
            .send()
            .await
            .context("Failed to reach agent platform")?;
        let agents: Vec<AgentSummary> = ensure_success(response, "List agents")
            .await?
            .json()
            .await
            .context("Failed to parse agent list")?;
        Ok(agents.into_iter().find(|a| a.name == name).map(|a| a.id))
    }

    async fn rename_agent(&self, agent_id: &str, name: &str) -> Result<()> {
        let response = self
            .endpoint
            .patch(&format!("/v1/agents/{}", agent_id))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .context("Failed to send rename request")?;
        ensure_success(response, "Rename agent").await?;
        Ok(())
    }

    fn base_url(&self) -> Option<&str> {
        Some(&self.endpoint.base_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamRoute {
    Agent(String),
    Conversation { id: String, agent_id: Option<String> },
}

impl StreamRoute {
    fn probe_path(&self) -> String {
        match self {
            Self::Agent(id) => format!("/v1/agents/{}", id),
            Self::Conversation { id, .. } => format!("/v1/conversations/{}", id),
        }
    }

    fn stream_path(&self) -> String {
        format!("{}/messages/stream", self.probe_path())
    }
}

/// Per-run settings sent alongside every message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RunOverrides {
    model: Option<String>,
    system_prompt: Option<String>,
    workspace: Option<String>,
}

impl From<&SessionOptions> for RunOverrides {
    fn from(options: &SessionOptions) -> Self {
        Self {
            model: options.model.clone(),
            system_prompt: options.system_prompt.clone(),
            workspace: options
                .workspace
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }
}

fn message_body(text: &str, overrides: &RunOverrides) -> serde_json::Value {
    let mut body = serde_json::json!({
        "messages": [{ "role": "user", "content": text }],
        "stream_tokens": true,
    });
    if let Some(model) = &overrides.model {
        body["model"] = serde_json::json!(model);
    }
    if let Some(system) = &overrides.system_prompt {
        body["system"] = serde_json::json!(system);
    }
    if let Some(workspace) = &overrides.workspace {
        body["workspace"] = serde_json::json!(workspace);
    }
    body
}

struct HttpSession {
    endpoint: Endpoint,
    route: StreamRoute,
    overrides: RunOverrides,
    response: Option<Response>,
    buffer: Vec<u8>,
    finished: bool,
}

impl HttpSession {
    fn take_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim_end().to_string())
    }
}

#[async_trait]
impl AgentSession for HttpSession {
    async fn initialize(&mut self) -> Result<()> {
        let response = self
            .endpoint
            .get(&self.route.probe_path())
            .send()
            .await
            .context("Failed to reach agent platform")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(anyhow!("{} not found", self.route.probe_path()));
        }
        ensure_success(response, "Open session").await?;
        Ok(())
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let body = message_body(text, &self.overrides);
        let response = self
            .endpoint
            .post_stream(&self.route.stream_path())
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .context("Failed to send message")?;
        self.response = Some(ensure_success(response, "Send message").await?);
        self.buffer.clear();
        self.finished = false;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if let Some(line) = self.take_line() {
                match parse_sse_line(&line)? {
                    SseLine::Event(event) => return Ok(Some(self.fill_ids(event))),
                    SseLine::Done => self.finished = true,
                    SseLine::Skip => {}
                }
                continue;
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };
            match response.chunk().await.context("Reply stream interrupted")? {
                Some(bytes) => self.buffer.extend_from_slice(&bytes),
                None => {
                    // flush an unterminated final line
                    if !self.buffer.is_empty() {
                        self.buffer.push(b'\n');
                    } else {
                        self.finished = true;
                    }
                    self.response = None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.response.take().is_some() {
            debug!("Closed reply stream for {}", self.route.probe_path());
        }
        self.finished = true;
    }
}

impl HttpSession {
    /// Default ids from the route when the platform leaves them out
    fn fill_ids(&self, event: StreamEvent) -> StreamEvent {
        match event {
            StreamEvent::Result {
                success,
                agent_id,
                conversation_id,
                error,
            } => {
                let (route_agent, route_conversation) = match &self.route {
                    StreamRoute::Agent(id) => (Some(id.clone()), None),
                    StreamRoute::Conversation { id, agent_id } => {
                        (agent_id.clone(), Some(id.clone()))
                    }
                };
                StreamEvent::Result {
                    success,
                    agent_id: agent_id.or(route_agent),
                    conversation_id: conversation_id.or(route_conversation),
                    error,
                }
            }
            other => other,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    AssistantMessage {
        #[serde(default)]
        content: String,
    },
    Result {
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        agent_id: Option<String>,
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Other,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Event(StreamEvent),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine> {
    let Some(data) = line.strip_prefix("data:") else {
        // comments, event names, keep-alives
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let wire: WireEvent =
        serde_json::from_str(data).with_context(|| format!("Malformed stream event: {}", data))?;
    Ok(SseLine::Event(match wire {
        WireEvent::AssistantMessage { content } => StreamEvent::AssistantText(content),
        WireEvent::Result {
            success,
            agent_id,
            conversation_id,
            error,
        } => StreamEvent::Result {
            success,
            agent_id,
            conversation_id,
            error,
        },
        WireEvent::Other => StreamEvent::Other,
    }))
}
