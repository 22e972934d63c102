//! Config command - configuration inspection.

use anyhow::Result;
use clap::{Args, Subcommand};

use tether_config::LoadedConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration (API key redacted)
    Show,

    /// Show which config files are searched and which were loaded
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = loaded.config.redacted();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("# tether configuration\n");
    print_sources(&loaded);

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    let server = config.server();
    println!("Server:");
    println!("  bind: {}", server.bind);
    println!(
        "  auth: {}",
        if server.api_key.is_some() {
            "api key"
        } else {
            "loopback only"
        }
    );
    println!();

    let admission = config.admission();
    println!("Admission:");
    println!("  max_sessions: {}", admission.max_sessions);
    for (agent, limit) in &admission.agent_limits {
        println!("  {:<12} {}", agent, limit);
    }
    println!();

    if config.agents.definitions.is_empty() {
        println!("No agents configured\n");
    } else {
        println!("Agents:");
        for (id, agent) in &config.agents.definitions {
            let marker = if config.agents.default.as_deref() == Some(id.as_str()) {
                " (default)"
            } else {
                ""
            };
            let command = agent.command.as_deref().unwrap_or("<none>");
            println!("  {:<12} {} {}{}", id, command, agent.args.join(" "), marker);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        println!("{}", config.to_toml()?);
    }

    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;

    if ctx.json_output {
        let sources: Vec<_> = loaded
            .sources
            .iter()
            .map(|s| serde_json::json!({ "path": s.path, "loaded": s.loaded }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("Config file search order (later overrides earlier):\n");
    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }
    println!();
    Ok(())
}

fn print_sources(loaded: &LoadedConfig) {
    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }
}
