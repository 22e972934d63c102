//! tether - remote session gateway for command-line agents
//!
//! Main entry point for the tether CLI.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
mod commands;

use commands::{config, start, status};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// tether - remote session gateway for command-line agents
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL (default: http://127.0.0.1:7420)
    #[arg(long, global = true, env = "TETHER_SERVER_URL")]
    pub server: Option<String>,

    /// User config directory (default: ~/.config/tether)
    #[arg(long, global = true, env = "TETHER_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Start(start::StartArgs),

    /// Show server status and session capacity
    Status(status::StatusArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "tether=debug,tether_server=debug,tether_agent=debug,tether_session=debug,tether_config=debug,tether::audit=debug,info"
    } else {
        "tether=info,tether_server=info,tether_agent=info,tether_session=info,warn"
    };
    let console_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let log_dir = log_dir(cli.config_dir.as_deref());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tether.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(console_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "tether=trace,tether_server=trace,tether_agent=trace,tether_session=trace,tether_config=trace,info",
                )),
        )
        .init();

    let server_url = cli
        .server
        .unwrap_or_else(|| "http://127.0.0.1:7420".to_string());

    let ctx = commands::Context {
        server_url,
        json_output: cli.json,
        verbose: cli.verbose,
        config_dir: cli.config_dir,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}

/// Directory for the JSON log files.
///
/// `[logging] dir` wins; otherwise `<config dir>/logs`. A config that fails to
/// load falls back silently here; the command itself reports the error.
fn log_dir(config_dir: Option<&Path>) -> PathBuf {
    let configured = tether_config::load_config_with_options(None, config_dir)
        .ok()
        .and_then(|loaded| loaded.config.logging().dir);

    if let Some(dir) = configured {
        return expand_home(&dir);
    }

    config_dir
        .map(Path::to_path_buf)
        .or_else(tether_config::xdg_config_dir)
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Expand a leading `~/` to the home directory.
pub(crate) fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
