use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use switchboard_channels::ConsoleChannel;
use switchboard_core::agents::{AgentManager, AgentState, InstanceSettings, StateStore};
use switchboard_core::platform::HttpPlatform;
use switchboard_core::routing::{PeerKind, Router, RoutingContext};
use switchboard_core::types::{TriggerContext, TriggerType};
use switchboard_gateway::{Gateway, HeartbeatService, HeartbeatSettings, StatusServer};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::SwitchboardConfig;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Switchboard: route chat platforms to stateful agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,

    /// Start the gateway
    Start,

    /// Show persisted agent state
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Forget an agent's remote identity
    Reset {
        /// Agent id from the config
        agent: String,
    },

    /// Show which agent a message would be routed to
    Route {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        account: Option<String>,
        /// Chat id of the peer
        #[arg(long)]
        peer: Option<String>,
        /// Treat the peer as a group chat
        #[arg(long)]
        group: bool,
    },

    /// Send a one-shot message to an agent
    Ask {
        /// The message to send
        message: String,
        /// Agent id; the default agent when omitted
        #[arg(long)]
        agent: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Status { json } => cmd_status(&cli.config, json).await,
        Commands::Reset { agent } => cmd_reset(&cli.config, &agent).await,
        Commands::Route {
            channel,
            account,
            peer,
            group,
        } => cmd_route(&cli.config, channel, account, peer, group).await,
        Commands::Ask { message, agent } => cmd_ask(&cli.config, &message, agent).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    let state_dir = config_dir.join("agents");
    tokio::fs::create_dir_all(&state_dir).await?;

    println!("Switchboard initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure the platform, agents and bindings.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

fn build_platform(cfg: &SwitchboardConfig) -> Result<Arc<HttpPlatform>> {
    let api_key = Some(cfg.platform.api_key.clone()).filter(|k| !k.is_empty());
    let platform = HttpPlatform::new(&cfg.platform.base_url, api_key, cfg.platform.timeout())
        .context("Failed to configure agent platform client")?;
    Ok(Arc::new(platform))
}

fn build_manager(cfg: &SwitchboardConfig) -> Result<Arc<AgentManager>> {
    let state_dir = cfg.state.path();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state dir: {}", state_dir.display()))?;
    let manager = AgentManager::new(
        cfg.agents.clone(),
        build_platform(cfg)?,
        &state_dir,
        InstanceSettings::default(),
    )?;
    Ok(Arc::new(manager))
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    info!("Starting switchboard...");

    let manager = build_manager(&cfg)?;
    let router = Router::new(cfg.bindings.clone(), manager.default_agent_id());
    let mut gateway = Gateway::new(manager, router);

    if cfg.channels.console.enabled {
        gateway.register_adapter(Arc::new(ConsoleChannel::new(&cfg.channels.console.user)));
    }
    let gateway = Arc::new(gateway);
    let started = gateway.start().await;
    if started == 0 {
        warn!("No channel adapters started; only the status API and heartbeat will run");
    }

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    {
        let gateway = gateway.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { gateway.run(cancel).await });
    }

    if cfg.heartbeat.enabled {
        let service = HeartbeatService::new(
            gateway.clone(),
            HeartbeatSettings {
                interval: Duration::from_secs(cfg.heartbeat.interval_secs),
                prompt: cfg.heartbeat.prompt.clone(),
                output_mode: cfg.heartbeat.output_mode,
                agent: cfg.heartbeat.agent.clone(),
            },
        );
        let cancel = cancel.clone();
        tasks.spawn(async move {
            service.run(cancel).await;
            Ok(())
        });
    }

    if cfg.api.enabled {
        let server = StatusServer::new(cfg.api.addr()?, cfg.api.auth_token.clone(), gateway.clone());
        let cancel = cancel.clone();
        tasks.spawn(async move { server.run(cancel).await });
    }

    println!("Switchboard is running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    cancel.cancel();
    gateway.stop().await;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Task failed: {}", e),
            Err(e) => error!("Task panicked: {}", e),
        }
    }

    println!("Switchboard stopped.");
    Ok(())
}

async fn cmd_status(config_path: &Option<PathBuf>, json: bool) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let state_dir = cfg.state.path();
    let default_agent = cfg.default_agent_id().to_string();

    let rows: Vec<(String, String, AgentState)> = cfg
        .agents
        .iter()
        .map(|a| {
            let state = StateStore::for_agent(&state_dir, &a.id).load();
            (a.id.clone(), a.name.clone(), state)
        })
        .collect();

    if json {
        let agents: Vec<serde_json::Value> = rows
            .iter()
            .map(|(id, name, state)| {
                serde_json::json!({
                    "id": id,
                    "name": name,
                    "default": *id == default_agent,
                    "phase": state.phase(),
                    "state": state,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    println!("State directory: {}", state_dir.display());
    for (id, name, state) in &rows {
        let marker = if *id == default_agent { "*" } else { " " };
        let last_used = state
            .last_used_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{} {:<12} {:<20} remote={:<24} conversations={:<3} last_used={} last_channel={}",
            marker,
            id,
            name,
            state.agent_id.as_deref().unwrap_or("-"),
            state.conversations.len(),
            last_used,
            state.last_active_channel().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn cmd_reset(config_path: &Option<PathBuf>, agent: &str) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    if !cfg.agents.iter().any(|a| a.id == agent) {
        bail!("no agent '{}' in config", agent);
    }
    let store = StateStore::for_agent(&cfg.state.path(), agent);
    if !store.save(&AgentState::default()) {
        bail!("failed to write {}", store.path().display());
    }
    println!("Agent '{}' reset; a new remote agent is created on its next message.", agent);
    Ok(())
}

async fn cmd_route(
    config_path: &Option<PathBuf>,
    channel: String,
    account: Option<String>,
    peer: Option<String>,
    group: bool,
) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let router = Router::new(cfg.bindings.clone(), cfg.default_agent_id());

    let mut ctx = RoutingContext::channel(channel);
    if let Some(account) = account {
        ctx = ctx.with_account(account);
    }
    if let Some(peer) = peer {
        let kind = if group { PeerKind::Group } else { PeerKind::Dm };
        ctx = ctx.with_peer(kind, peer);
    }

    let result = router.route(&ctx);
    println!("agent: {}", result.agent_id);
    println!("match: {}", result.match_level);
    if let Some(binding) = result.matched_binding {
        println!("binding: {}", serde_json::to_string(binding)?);
    }
    Ok(())
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: &str, agent: Option<String>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let manager = build_manager(&cfg)?;
    let instance = match &agent {
        Some(id) => manager
            .get(id)
            .with_context(|| format!("no agent '{}' in config", id))?,
        None => manager.default_agent(),
    };

    let reply = instance
        .send_to_agent(message, TriggerContext::new(TriggerType::UserMessage))
        .await?;
    println!("{}", reply);
    Ok(())
}
