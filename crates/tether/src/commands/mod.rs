//! CLI command handlers.

use std::path::PathBuf;

use anyhow::Result;

use tether_config::LoadedConfig;

pub mod config;
pub mod start;
pub mod status;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Server URL to connect to.
    pub server_url: String,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// User config directory override.
    pub config_dir: Option<PathBuf>,
}

impl Context {
    /// Discover and merge the config layers.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        Ok(tether_config::load_config_with_options(
            None,
            self.config_dir.as_deref(),
        )?)
    }
}
