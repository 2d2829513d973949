//! Agent manager: one instance per configured agent

use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::AgentConfig;
use super::instance::{AgentInstance, AgentStatus, InstanceSettings};
use super::state::StateStore;
use crate::platform::AgentPlatform;

/// Aggregate status across every managed agent
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub default_agent: String,
    pub agents: Vec<AgentStatus>,
}

/// Owns the agent instances and the remote identity checks run at startup
pub struct AgentManager {
    instances: HashMap<String, Arc<AgentInstance>>,
    /// Declaration order, for stable listings
    order: Vec<String>,
    default_agent_id: String,
    platform: Arc<dyn AgentPlatform>,
}

impl AgentManager {
    /// Build instances for `configs`, each with its state file under
    /// `state_dir`.
    ///
    /// The default agent is the one flagged `default`, else the first
    /// declared. Must be called from within a tokio runtime.
    pub fn new(
        configs: Vec<AgentConfig>,
        platform: Arc<dyn AgentPlatform>,
        state_dir: &Path,
        settings: InstanceSettings,
    ) -> Result<Self> {
        let Some(first) = configs.first() else {
            bail!("at least one agent must be configured");
        };
        let default_agent_id = configs
            .iter()
            .find(|c| c.default)
            .unwrap_or(first)
            .id
            .clone();

        let mut instances = HashMap::new();
        let mut order = Vec::with_capacity(configs.len());
        for config in configs {
            if instances.contains_key(&config.id) {
                bail!("duplicate agent id '{}'", config.id);
            }
            let id = config.id.clone();
            let store = StateStore::for_agent(state_dir, &id);
            let instance =
                AgentInstance::with_settings(config, platform.clone(), store, settings.clone());
            instances.insert(id.clone(), Arc::new(instance));
            order.push(id);
        }

        info!(
            "AgentManager: {} agent(s), default '{}'",
            order.len(),
            default_agent_id
        );
        Ok(Self {
            instances,
            order,
            default_agent_id,
            platform,
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentInstance>> {
        self.instances.get(id).cloned()
    }

    pub fn default_agent_id(&self) -> &str {
        &self.default_agent_id
    }

    pub fn default_agent(&self) -> Arc<AgentInstance> {
        // constructor guarantees the default is present
        self.instances[&self.default_agent_id].clone()
    }

    /// Instances in declaration order
    pub fn list(&self) -> Vec<Arc<AgentInstance>> {
        self.order
            .iter()
            .filter_map(|id| self.instances.get(id).cloned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.instances.len()
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            default_agent: self.default_agent_id.clone(),
            agents: self.list().iter().map(|a| a.status()).collect(),
        }
    }

    /// Check every stored identity against the platform and reset the ones
    /// that no longer exist. Returns how many were reset.
    ///
    /// Platform errors leave the stored identity untouched.
    pub async fn verify_agents(&self) -> usize {
        let mut reset = 0;
        for instance in self.list() {
            let Some(agent_id) = instance.agent_id() else {
                continue;
            };
            match self.platform.agent_exists(&agent_id).await {
                Ok(true) => debug!("Agent '{}' verified ({})", instance.id(), agent_id),
                Ok(false) => {
                    warn!(
                        "Remote agent {} for '{}' no longer exists, resetting",
                        agent_id,
                        instance.id()
                    );
                    instance.reset();
                    reset += 1;
                }
                Err(e) => warn!(
                    "Could not verify agent '{}' ({}): {}",
                    instance.id(),
                    agent_id,
                    e
                ),
            }
        }
        reset
    }

    /// Bind agents without an identity to a remote agent with the same
    /// display name. Returns how many were bound.
    pub async fn discover_agents_by_name(&self) -> usize {
        let mut found = 0;
        for instance in self.list() {
            if instance.agent_id().is_some() {
                continue;
            }
            match self.platform.find_agent_by_name(instance.name()).await {
                Ok(Some(agent_id)) => {
                    info!(
                        "Discovered remote agent {} for '{}' by name",
                        agent_id,
                        instance.id()
                    );
                    instance.set_agent_id(agent_id);
                    found += 1;
                }
                Ok(None) => debug!("No remote agent named '{}'", instance.name()),
                Err(e) => warn!("Agent lookup for '{}' failed: {}", instance.name(), e),
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::state::AgentState;
    use crate::testing::MockPlatform;

    fn configs() -> Vec<AgentConfig> {
        vec![AgentConfig::new("main", "Main"), AgentConfig::new("ops", "Ops")]
    }

    fn manager(platform: &MockPlatform, dir: &Path, configs: Vec<AgentConfig>) -> AgentManager {
        AgentManager::new(
            configs,
            Arc::new(platform.clone()),
            dir,
            InstanceSettings::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_declared_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&MockPlatform::new(), dir.path(), configs());
        assert_eq!(mgr.default_agent_id(), "main");
        assert_eq!(mgr.default_agent().id(), "main");
        assert_eq!(mgr.count(), 2);
        let ids: Vec<String> = mgr.list().iter().map(|a| a.id().to_string()).collect();
        assert_eq!(ids, vec!["main", "ops"]);
    }

    #[tokio::test]
    async fn test_flagged_default_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfgs = configs();
        cfgs[1].default = true;
        let mgr = manager(&MockPlatform::new(), dir.path(), cfgs);
        assert_eq!(mgr.default_agent_id(), "ops");
    }

    #[tokio::test]
    async fn test_rejects_empty_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let platform: Arc<dyn AgentPlatform> = Arc::new(MockPlatform::new());
        assert!(
            AgentManager::new(vec![], platform.clone(), dir.path(), InstanceSettings::default())
                .is_err()
        );
        let dup = vec![AgentConfig::new("a", "A"), AgentConfig::new("a", "B")];
        assert!(AgentManager::new(dup, platform, dir.path(), InstanceSettings::default()).is_err());
    }

    #[tokio::test]
    async fn test_verify_resets_missing_agents() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        platform.add_agent("Main", "agent-live");
        for (id, agent) in [("main", "agent-live"), ("ops", "agent-gone")] {
            StateStore::for_agent(dir.path(), id).save(&AgentState {
                agent_id: Some(agent.to_string()),
                ..AgentState::default()
            });
        }
        let mgr = manager(&platform, dir.path(), configs());

        assert_eq!(mgr.verify_agents().await, 1);
        assert_eq!(mgr.get("main").unwrap().agent_id().as_deref(), Some("agent-live"));
        assert!(mgr.get("ops").unwrap().agent_id().is_none());
    }

    #[tokio::test]
    async fn test_verify_keeps_state_on_platform_error() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        StateStore::for_agent(dir.path(), "main").save(&AgentState {
            agent_id: Some("agent-1".to_string()),
            ..AgentState::default()
        });
        platform.set_unreachable();
        let mgr = manager(&platform, dir.path(), configs());

        assert_eq!(mgr.verify_agents().await, 0);
        assert_eq!(mgr.get("main").unwrap().agent_id().as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn test_discover_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        platform.add_agent("Ops", "agent-ops");
        let mgr = manager(&platform, dir.path(), configs());

        assert_eq!(mgr.discover_agents_by_name().await, 1);
        assert_eq!(mgr.get("ops").unwrap().agent_id().as_deref(), Some("agent-ops"));
        assert!(mgr.get("main").unwrap().agent_id().is_none());
        // persisted for the next start
        let state = StateStore::for_agent(dir.path(), "ops").load();
        assert_eq!(state.agent_id.as_deref(), Some("agent-ops"));
    }

    #[tokio::test]
    async fn test_status_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&MockPlatform::new(), dir.path(), configs());
        let status = mgr.status();
        assert_eq!(status.default_agent, "main");
        assert_eq!(status.agents.len(), 2);
    }
}
