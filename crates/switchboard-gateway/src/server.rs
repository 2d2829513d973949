//! Status API: axum HTTP server over the running gateway

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth;
use crate::gateway::Gateway;

/// Shared state for the API handlers
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<Gateway>,
    pub auth_token: String,
}

pub struct StatusServer {
    state: ApiState,
    bind: SocketAddr,
}

impl StatusServer {
    pub fn new(bind: SocketAddr, auth_token: String, gateway: Arc<Gateway>) -> Self {
        Self {
            state: ApiState {
                gateway,
                auth_token,
            },
            bind,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(status_handler))
            .route("/api/agents", get(agents_handler))
            .route("/api/agents/{id}/reset", post(reset_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until cancelled
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Status API listening on {}", listener.local_addr()?);
        axum::serve(listener, router)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        Ok(())
    }
}

async fn status_handler(State(state): State<ApiState>) -> Json<Value> {
    let status = state.gateway.status();
    Json(json!({
        "status": "ok",
        "uptime_secs": status.uptime_secs,
        "agents": status.agents.agents.len(),
        "default_agent": status.agents.default_agent,
        "adapters": status.adapters,
        "bindings": status.bindings,
        "dispatched": status.dispatched,
    }))
}

async fn agents_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    if !auth::authorize(&state.auth_token, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let status = state.gateway.manager().status();
    Ok(Json(json!({ "agents": status.agents })))
}

async fn reset_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    if !auth::authorize(&state.auth_token, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let agent = state
        .gateway
        .manager()
        .get(&id)
        .ok_or(StatusCode::NOT_FOUND)?;
    agent.reset();
    info!("Agent '{}' reset via status API", id);
    Ok(Json(json!({ "reset": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::agents::{AgentConfig, AgentManager, InstanceSettings};
    use switchboard_core::testing::{MockAdapter, MockPlatform};

    fn state(dir: &std::path::Path, token: &str) -> ApiState {
        let manager = AgentManager::new(
            vec![AgentConfig::new("main", "Main")],
            Arc::new(MockPlatform::new()),
            dir,
            InstanceSettings::default(),
        )
        .unwrap();
        let mut gateway = Gateway::new(
            Arc::new(manager),
            switchboard_core::routing::Router::new(Vec::new(), "main"),
        );
        gateway.register_adapter(Arc::new(MockAdapter::new("console")));
        ApiState {
            gateway: Arc::new(gateway),
            auth_token: token.to_string(),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {}", token).parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_status_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let Json(body) = status_handler(State(state(dir.path(), "secret"))).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["agents"], 1);
        assert_eq!(body["adapters"][0], "console");
    }

    #[tokio::test]
    async fn test_agents_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), "secret");
        let denied = agents_handler(State(st.clone()), HeaderMap::new()).await;
        assert_eq!(denied.unwrap_err(), StatusCode::UNAUTHORIZED);

        let Json(body) = agents_handler(State(st), bearer("secret")).await.unwrap();
        assert_eq!(body["agents"][0]["id"], "main");
        assert_eq!(body["agents"][0]["phase"], "no_identity");
    }

    #[tokio::test]
    async fn test_reset_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), "");
        let agent = st.gateway.manager().get("main").unwrap();
        agent.set_agent_id("agent-1");

        let missing = reset_handler(
            State(st.clone()),
            Path("nobody".to_string()),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);

        reset_handler(State(st), Path("main".to_string()), HeaderMap::new())
            .await
            .unwrap();
        assert!(agent.agent_id().is_none());
    }

    #[tokio::test]
    async fn test_served_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(dir.path(), "secret");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = StatusServer {
            state: st,
            bind: addr,
        };
        let router = server.router();
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        });

        let client = reqwest::Client::new();
        let status = client
            .get(format!("http://{}/api/status", addr))
            .send()
            .await
            .unwrap();
        assert!(status.status().is_success());
        let unauthorized = client
            .get(format!("http://{}/api/agents", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(unauthorized.status().as_u16(), 401);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
