//! Configuration system for the tether session gateway.
//!
//! Provides TOML-based configuration with:
//! - `[server]`, `[guard]`, `[admission]`, `[logging]` sections
//! - Named agent definitions (`[agents.<id>]`) with a default agent
//! - Config file layering (user config dir + project-local `tether.toml`)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
