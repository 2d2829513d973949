use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use switchboard_core::agents::AgentConfig;
use switchboard_core::routing::Binding;
use switchboard_core::types::OutputMode;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    pub platform: PlatformConfig,
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

// ── Remote Platform ─────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_platform_timeout")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &mask_secret(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_base_url() -> String {
    "http://localhost:8283".to_string()
}

fn default_platform_timeout() -> u64 {
    30
}

impl PlatformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── State ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: String,
}

fn default_state_dir() -> String {
    "~/.switchboard/agents".to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

impl StateConfig {
    pub fn path(&self) -> PathBuf {
        shellexpand_home(&self.dir)
    }
}

// ── Channels ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sender name attached to console messages
    #[serde(default = "default_console_user")]
    pub user: String,
}

fn default_console_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "console".to_string())
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user: default_console_user(),
        }
    }
}

// ── Heartbeat ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_heartbeat_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Agent to wake; the default agent when unset
    #[serde(default)]
    pub agent: Option<String>,
}

fn default_heartbeat_interval() -> u64 {
    1800
}

fn default_heartbeat_prompt() -> String {
    "Heartbeat: review your memory and reply only if something needs the user's attention."
        .to_string()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_heartbeat_interval(),
            prompt: default_heartbeat_prompt(),
            output_mode: OutputMode::Silent,
            agent: None,
        }
    }
}

// ── Status API ──────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_bind")]
    pub bind: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: String,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("enabled", &self.enabled)
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("auth_token", &mask_secret(&self.auth_token))
            .finish()
    }
}

fn default_api_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    18790
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_api_bind(),
            port: default_api_port(),
            auth_token: String::new(),
        }
    }
}

impl ApiConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid API bind address {}:{}", self.bind, self.port))
    }
}

fn default_true() -> bool {
    true
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".switchboard")
}

/// Expand a leading `~/` to the home directory
pub fn shellexpand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

impl SwitchboardConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        // Refuse to start if group or other can read the file
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `switchboard init` first.",
                path.display()
            )
        })?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        let hardcoded_key = content.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with("api_key") && !line.contains("${") && !line.contains("\"\"")
        });
        if hardcoded_key {
            warn!(
                "Platform API key is hardcoded in config file. For security, use environment variables: api_key = \"${{SWITCHBOARD_API_KEY}}\""
            );
        }

        Ok(config)
    }

    /// Parse and validate config text, expanding allowlisted env vars
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            bail!("at least one [[agents]] entry is required");
        }
        let mut ids = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.id.as_str()) {
                bail!("duplicate agent id '{}'", agent.id);
            }
        }
        if self.agents.iter().filter(|a| a.default).count() > 1 {
            bail!("only one agent may set default = true");
        }
        for binding in &self.bindings {
            if !ids.contains(binding.agent_id.as_str()) {
                bail!(
                    "binding for channel '{}' references unknown agent '{}'",
                    binding.matcher.channel,
                    binding.agent_id
                );
            }
        }
        if let Some(agent) = &self.heartbeat.agent {
            if !ids.contains(agent.as_str()) {
                bail!("heartbeat references unknown agent '{}'", agent);
            }
        }
        if self.heartbeat.enabled && self.heartbeat.interval_secs == 0 {
            bail!("heartbeat.interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Id of the agent that handles unbound traffic
    pub fn default_agent_id(&self) -> &str {
        self.agents
            .iter()
            .find(|a| a.default)
            .or_else(|| self.agents.first())
            .map(|a| a.id.as_str())
            .unwrap_or_default()
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
const ALLOWED_ENV_VARS: &[&str] = &[
    "SWITCHBOARD_API_KEY",
    "SWITCHBOARD_BASE_URL",
    "SWITCHBOARD_API_TOKEN",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }
        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::conversation::ConversationMode;
    use switchboard_core::routing::PeerKind;

    const SAMPLE: &str = r#"
        [platform]
        base_url = "http://localhost:8283"

        [[agents]]
        id = "main"
        name = "Main"

        [[agents]]
        id = "work"
        name = "Work"
        default = true
        [agents.conversations]
        mode = "per-channel"

        [[bindings]]
        agent_id = "work"
        match = { channel = "slack", account_id = "acme" }

        [[bindings]]
        agent_id = "main"
        [bindings.match]
        channel = "telegram"
        peer = { kind = "group", id = "-100" }
    "#;

    #[test]
    fn test_parse_sample() {
        let config = SwitchboardConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.default_agent_id(), "work");
        assert_eq!(
            config.agents[1].conversations.mode,
            Some(ConversationMode::PerChannel)
        );
        assert_eq!(config.bindings[0].matcher.account_id.as_deref(), Some("acme"));
        let peer = config.bindings[1].matcher.peer.as_ref().unwrap();
        assert_eq!(peer.kind, PeerKind::Group);
        assert!(config.channels.console.enabled);
        assert!(!config.api.enabled);
        assert_eq!(config.heartbeat.output_mode, OutputMode::Silent);
    }

    #[test]
    fn test_default_config_parses() {
        let config = SwitchboardConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.default_agent_id(), "main");
    }

    #[test]
    fn test_rejects_unknown_binding_agent() {
        let text = SAMPLE.replace("agent_id = \"work\"", "agent_id = \"nobody\"");
        let err = SwitchboardConfig::parse(&text).unwrap_err();
        assert!(err.to_string().contains("nobody"));
    }

    #[test]
    fn test_rejects_missing_agents() {
        assert!(SwitchboardConfig::parse("agents = []\n[platform]\n").is_err());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-1234567890"), "sk-...7890");
    }

    #[test]
    fn test_debug_hides_api_key() {
        let mut config = SwitchboardConfig::parse(SAMPLE).unwrap();
        config.platform.api_key = "sk-live-abcdef123456".to_string();
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("sk-live-abcdef123456"));
    }

    #[test]
    fn test_expand_skips_unlisted_vars() {
        assert_eq!(expand_env_vars("x = \"${NOT_ALLOWED}\""), "x = \"${NOT_ALLOWED}\"");
        assert_eq!(expand_env_vars("no vars"), "no vars");
    }

    #[test]
    fn test_shellexpand_home() {
        assert_eq!(shellexpand_home("/var/lib/sb"), PathBuf::from("/var/lib/sb"));
        assert!(shellexpand_home("~/x").ends_with("x"));
    }
}
