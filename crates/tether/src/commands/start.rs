//! Start command - launches the tether server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use tether_agent::AgentRegistry;
use tether_server::{Server, ServerConfig};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Address to bind to, `host:port` (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port to listen on (overrides the port of the bind address)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// API key clients must send in `x-api-key` (or set TETHER_API_KEY)
    #[arg(long, env = "TETHER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Directory media uploads are written to (overrides config)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    // ── Load configuration ──────────────────────────────────────────────

    let loaded = ctx.load_config()?;

    for warning in &loaded.warnings {
        eprintln!("warning: {}", warning);
    }

    if ctx.verbose {
        let sources = loaded.loaded_from();
        if sources.is_empty() {
            println!("No config files found, using defaults + CLI args");
        } else {
            for source in sources {
                println!("Loaded config: {}", source.display());
            }
        }
    }

    let config = &loaded.config;
    let server_config = apply_overrides(ServerConfig::from_tether_config(config)?, &args)?;

    // ── Agents ──────────────────────────────────────────────────────────

    let agents = AgentRegistry::from_config(&config.agents);
    if agents.is_empty() {
        eprintln!("warning: no agents configured; every START will fail with 'No agent configured'");
    } else {
        println!(
            "Agents: {} (default: {})",
            agents.agent_ids().join(", "),
            agents.resolve_id(None).unwrap_or("none")
        );
    }

    // ── Server ──────────────────────────────────────────────────────────

    println!("Bind address: {}", server_config.bind_address);
    match &server_config.api_key {
        Some(_) => println!("Auth: API key required"),
        None => println!("Auth: disabled (loopback only)"),
    }
    if ctx.verbose {
        println!("Upload dir: {}", server_config.upload_dir.display());
        println!(
            "Session limit: {}",
            server_config.admission.max_sessions
        );
    }

    let server = Server::new(server_config, agents);
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    server.run().await?;
    Ok(())
}

/// Layer CLI flags over the file configuration.
fn apply_overrides(mut config: ServerConfig, args: &StartArgs) -> Result<ServerConfig> {
    if let Some(bind) = &args.bind {
        let addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid --bind address '{}'", bind))?;
        config = config.with_bind_address(addr);
    }
    if let Some(port) = args.port {
        let mut addr = config.bind_address;
        addr.set_port(port);
        config = config.with_bind_address(addr);
    }
    if let Some(key) = &args.api_key {
        config = config.with_api_key(Some(key.clone()).filter(|k| !k.is_empty()));
    }
    if let Some(dir) = &args.upload_dir {
        config = config.with_upload_dir(dir.clone());
    }
    Ok(config)
}
