//! Status command - shows server status and session capacity.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;
use crate::client::Client;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also show capacity for this agent
    #[arg(short, long)]
    pub agent: Option<String>,

    /// API key for the management API (or set TETHER_API_KEY)
    #[arg(long, env = "TETHER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

/// Status response for JSON output.
#[derive(Debug, Serialize)]
struct StatusOutput {
    running: bool,
    version: Option<String>,
    server_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sessions: Option<CapacityOutput>,
}

#[derive(Debug, Serialize)]
struct CapacityOutput {
    active: usize,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<AgentOutput>,
}

#[derive(Debug, Serialize)]
struct AgentOutput {
    agent_id: String,
    active: usize,
    limit: usize,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let client = Client::new(&ctx.server_url, args.api_key.clone())?;

    let health = match client.health().await {
        Ok(health) => health,
        Err(e) => {
            print_not_running(ctx, &e)?;
            return Ok(());
        }
    };

    // capacity needs auth; a failure here still means the server is up
    let capacity = match client.capacity(args.agent.as_deref()).await {
        Ok(capacity) => Some(capacity),
        Err(e) => {
            if ctx.verbose {
                eprintln!("warning: could not read capacity: {}", e);
            }
            None
        }
    };

    if ctx.json_output {
        let output = StatusOutput {
            running: true,
            version: Some(health.version.clone()),
            server_url: ctx.server_url.clone(),
            sessions: capacity.as_ref().map(|c| CapacityOutput {
                active: c.server.active,
                limit: c.server.limit,
                agent: c.agent.as_ref().map(|a| AgentOutput {
                    agent_id: a.agent_id.clone(),
                    active: a.active,
                    limit: a.limit,
                }),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let green = Style::new().green();
    let dim = Style::new().dim();

    println!();
    println!("{}", style("tether Server Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!(
        "  {} {}",
        dim.apply_to("Status:"),
        green.apply_to("● running")
    );
    println!("  {} {}", dim.apply_to("Version:"), health.version);
    println!("  {} {}", dim.apply_to("Server:"), ctx.server_url);

    match &capacity {
        Some(capacity) => {
            println!(
                "  {} {}/{} ({} free)",
                dim.apply_to("Sessions:"),
                capacity.server.active,
                capacity.server.limit,
                capacity.server.remaining
            );
            if let Some(agent) = &capacity.agent {
                println!(
                    "  {} {}/{} ({} free)",
                    dim.apply_to(format!("Agent {}:", agent.agent_id)),
                    agent.active,
                    agent.limit,
                    agent.remaining
                );
            }
        }
        None => {
            println!(
                "  {} {}",
                dim.apply_to("Sessions:"),
                dim.apply_to("unavailable (check --api-key)")
            );
        }
    }

    println!();
    Ok(())
}

fn print_not_running(ctx: &Context, error: &anyhow::Error) -> Result<()> {
    if ctx.json_output {
        let output = StatusOutput {
            running: false,
            version: None,
            server_url: ctx.server_url.clone(),
            sessions: None,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let red = Style::new().red();
    let dim = Style::new().dim();

    println!();
    println!("{}", style("tether Server Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!(
        "  {} {}",
        dim.apply_to("Status:"),
        red.apply_to("● not running")
    );
    println!("  {} {}", dim.apply_to("Server:"), ctx.server_url);

    if ctx.verbose {
        println!();
        println!("  {} {}", dim.apply_to("Error:"), error);
    }

    println!();
    println!("  {}", dim.apply_to("Start the server with: tether start"));
    println!();
    Ok(())
}
