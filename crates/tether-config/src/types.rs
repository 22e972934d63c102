//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server]                 # bind address, API key, management API limits
//! [guard]                  # per-peer connection/message rate limiting
//! [admission]              # session ceilings
//! [admission.agent_limits] # per-agent ceilings
//! [agents]                 # default agent id
//! [agents.claude]          # named agent commands
//! [logging]                # log directory
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Default values shared by the config sections and the runtime crates.
pub mod defaults {
    pub const BIND: &str = "127.0.0.1:7420";
    pub const API_RPM: u32 = 120;
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    pub const UPLOAD_DIR: &str = "uploads";
    pub const SCRIPT_TIMEOUT_SECS: u64 = 300;

    pub const CONNECTION_WINDOW_SECS: u64 = 60;
    pub const MAX_CONNECTION_ATTEMPTS_PER_WINDOW: u32 = 30;
    pub const MAX_CONNECTIONS_PER_PEER: u32 = 10;
    pub const MESSAGE_WINDOW_MS: u64 = 1000;
    pub const MAX_MESSAGES_PER_WINDOW: u32 = 50;
    pub const VIOLATION_THRESHOLD: u32 = 5;
    pub const BLOCK_COOLDOWN_SECS: u64 = 300;
    pub const MAX_HISTORY_ENTRIES: usize = 1000;

    pub const MAX_SESSIONS: usize = 10;
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Server configuration.
    pub server: Option<ServerSection>,

    /// Connection guard configuration.
    pub guard: Option<GuardSection>,

    /// Admission control configuration.
    pub admission: Option<AdmissionSection>,

    /// Agent definitions.
    pub agents: AgentsSection,

    /// Logging configuration.
    pub logging: Option<LoggingSection>,
}

impl TetherConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: TetherConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }

        if other.guard.is_some() {
            self.guard = other.guard;
        }

        if other.admission.is_some() {
            self.admission = other.admission;
        }

        if other.agents.default.is_some() {
            self.agents.default = other.agents.default;
        }
        for (id, agent) in other.agents.definitions {
            self.agents.definitions.insert(id, agent);
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective server section.
    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    /// Effective guard section.
    pub fn guard(&self) -> GuardSection {
        self.guard.clone().unwrap_or_default()
    }

    /// Effective admission section.
    pub fn admission(&self) -> AdmissionSection {
        self.admission.clone().unwrap_or_default()
    }

    /// Effective logging section.
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Copy of this config with secrets replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(server) = copy.server.as_mut()
            && server.api_key.is_some()
        {
            server.api_key = Some("********".to_string());
        }
        copy
    }

    /// Check the config for values the runtime cannot work with.
    ///
    /// Returns non-fatal warnings (e.g. per-agent limits that will be clamped).
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        let guard = self.guard();
        require_nonzero("guard.connection_window_secs", guard.connection_window_secs)?;
        require_nonzero("guard.message_window_ms", guard.message_window_ms)?;
        require_nonzero(
            "guard.max_connection_attempts_per_window",
            u64::from(guard.max_connection_attempts_per_window),
        )?;
        require_nonzero(
            "guard.max_connections_per_peer",
            u64::from(guard.max_connections_per_peer),
        )?;
        require_nonzero(
            "guard.max_messages_per_window",
            u64::from(guard.max_messages_per_window),
        )?;
        require_nonzero("guard.violation_threshold", u64::from(guard.violation_threshold))?;
        require_nonzero("guard.max_history_entries", guard.max_history_entries as u64)?;

        let admission = self.admission();
        require_nonzero("admission.max_sessions", admission.max_sessions as u64)?;
        for (agent, limit) in &admission.agent_limits {
            if *limit > admission.max_sessions {
                warnings.push(format!(
                    "admission.agent_limits.{} = {} exceeds admission.max_sessions = {}; it will be clamped",
                    agent, limit, admission.max_sessions
                ));
            }
        }

        let server = self.server();
        if server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "server.bind".to_string(),
                reason: format!("'{}' is not a socket address", server.bind),
            });
        }

        if let Some(default) = &self.agents.default
            && !self.agents.definitions.contains_key(default)
        {
            return Err(ConfigError::UnknownDefaultAgent(default.clone()));
        }

        for (id, agent) in &self.agents.definitions {
            if agent.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                warnings.push(format!(
                    "[agents.{}] has no command; starting it will fail with 'no agent configured'",
                    id
                ));
            }
        }

        Ok(warnings)
    }
}

fn require_nonzero(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to (`host:port`).
    pub bind: String,
    /// API key expected in the `x-api-key` header. `None` means loopback-only.
    pub api_key: Option<String>,
    /// Enable rate limiting of the management API.
    pub rate_limiting: bool,
    /// Management API rate limit: requests per minute.
    pub api_rpm: u32,
    /// Enable request logging.
    pub request_logging: bool,
    /// Maximum inbound WebSocket frame size in bytes.
    pub max_message_size: usize,
    /// Directory media uploads are written to.
    pub upload_dir: PathBuf,
    /// Upper bound on a single script run.
    pub script_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: defaults::BIND.to_string(),
            api_key: None,
            rate_limiting: true,
            api_rpm: defaults::API_RPM,
            request_logging: true,
            max_message_size: defaults::MAX_MESSAGE_SIZE,
            upload_dir: PathBuf::from(defaults::UPLOAD_DIR),
            script_timeout_secs: defaults::SCRIPT_TIMEOUT_SECS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guard Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection guard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSection {
    /// Master switch; when false only the ban list is enforced.
    pub enabled: bool,
    /// Sliding window for connection attempts.
    pub connection_window_secs: u64,
    /// Connection attempts allowed per peer inside the window.
    pub max_connection_attempts_per_window: u32,
    /// Concurrent connections allowed per peer.
    pub max_connections_per_peer: u32,
    /// Sliding window for client messages.
    pub message_window_ms: u64,
    /// Messages allowed per peer inside the window.
    pub max_messages_per_window: u32,
    /// Violations before a peer is blocked.
    pub violation_threshold: u32,
    /// How long a block lasts.
    pub block_cooldown_secs: u64,
    /// Rows kept in the connection history ring buffer.
    pub max_history_entries: usize,
}

impl Default for GuardSection {
    fn default() -> Self {
        Self {
            enabled: true,
            connection_window_secs: defaults::CONNECTION_WINDOW_SECS,
            max_connection_attempts_per_window: defaults::MAX_CONNECTION_ATTEMPTS_PER_WINDOW,
            max_connections_per_peer: defaults::MAX_CONNECTIONS_PER_PEER,
            message_window_ms: defaults::MESSAGE_WINDOW_MS,
            max_messages_per_window: defaults::MAX_MESSAGES_PER_WINDOW,
            violation_threshold: defaults::VIOLATION_THRESHOLD,
            block_cooldown_secs: defaults::BLOCK_COOLDOWN_SECS,
            max_history_entries: defaults::MAX_HISTORY_ENTRIES,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Admission Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Admission control configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSection {
    /// Server-wide ceiling on concurrently running sessions.
    pub max_sessions: usize,
    /// Per-agent ceilings; agents without an entry inherit `max_sessions`.
    pub agent_limits: BTreeMap<String, usize>,
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            max_sessions: defaults::MAX_SESSIONS,
            agent_limits: BTreeMap::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// The `[agents]` table: a default id plus one sub-table per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsSection {
    /// Agent used when a START names no agent or an unknown one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Agent definitions keyed by agent id.
    #[serde(flatten)]
    pub definitions: BTreeMap<String, AgentDefinition>,
}

/// One agent command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefinition {
    /// Executable to spawn. Missing or blank means "no agent configured".
    pub command: Option<String>,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory for rolling JSON log files. Defaults to `<config dir>/logs`.
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[server]
bind = "0.0.0.0:9000"
api_key = "secret"
api_rpm = 30

[guard]
max_messages_per_window = 10
violation_threshold = 3

[admission]
max_sessions = 5

[admission.agent_limits]
claude = 1

[agents]
default = "claude"

[agents.claude]
command = "claude"
args = ["--print"]

[agents.shell]
command = "bash"
env = { TERM = "dumb" }
"#;

    #[test]
    fn test_parse_full_config() {
        let config = TetherConfig::from_toml(FULL).unwrap();

        let server = config.server();
        assert_eq!(server.bind, "0.0.0.0:9000");
        assert_eq!(server.api_key.as_deref(), Some("secret"));
        assert_eq!(server.api_rpm, 30);
        assert!(server.rate_limiting);

        let guard = config.guard();
        assert_eq!(guard.max_messages_per_window, 10);
        assert_eq!(guard.violation_threshold, 3);
        assert_eq!(guard.connection_window_secs, defaults::CONNECTION_WINDOW_SECS);

        let admission = config.admission();
        assert_eq!(admission.max_sessions, 5);
        assert_eq!(admission.agent_limits.get("claude"), Some(&1));

        assert_eq!(config.agents.default.as_deref(), Some("claude"));
        assert_eq!(config.agents.definitions.len(), 2);
        let shell = &config.agents.definitions["shell"];
        assert_eq!(shell.command.as_deref(), Some("bash"));
        assert_eq!(shell.env.get("TERM").map(String::as_str), Some("dumb"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TetherConfig::from_toml("").unwrap();
        assert_eq!(config.server().bind, defaults::BIND);
        assert!(config.guard().enabled);
        assert_eq!(config.admission().max_sessions, defaults::MAX_SESSIONS);
        assert!(config.agents.definitions.is_empty());
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_merge_overrides_sections_and_agents() {
        let mut base = TetherConfig::from_toml(FULL).unwrap();
        let overlay = TetherConfig::from_toml(
            r#"
[admission]
max_sessions = 2

[agents.claude]
command = "claude-dev"
"#,
        )
        .unwrap();

        base.merge(overlay);

        assert_eq!(base.admission().max_sessions, 2);
        assert_eq!(base.server().bind, "0.0.0.0:9000");
        assert_eq!(
            base.agents.definitions["claude"].command.as_deref(),
            Some("claude-dev")
        );
        assert!(base.agents.definitions.contains_key("shell"));
        assert_eq!(base.agents.default.as_deref(), Some("claude"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = TetherConfig::from_toml("[guard]\nmax_messages_per_window = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_messages_per_window"));

        let config = TetherConfig::from_toml("[admission]\nmax_sessions = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_warns_on_oversized_agent_limit() {
        let config = TetherConfig::from_toml(
            "[admission]\nmax_sessions = 2\n[admission.agent_limits]\nclaude = 9\n",
        )
        .unwrap();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("clamped"));
    }

    #[test]
    fn test_validate_unknown_default_agent() {
        let config = TetherConfig::from_toml("[agents]\ndefault = \"ghost\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownDefaultAgent(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_validate_warns_on_missing_command() {
        let config = TetherConfig::from_toml("[agents.empty]\nargs = []\n").unwrap();
        let warnings = config.validate().unwrap();
        assert!(warnings[0].contains("no agent configured"));
    }

    #[test]
    fn test_validate_bad_bind() {
        let config = TetherConfig::from_toml("[server]\nbind = \"nope\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let config = TetherConfig::from_toml(FULL).unwrap();
        let shown = config.redacted().to_toml().unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("********"));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = TetherConfig::from_toml(FULL).unwrap();
        let text = config.to_toml().unwrap();
        let back = TetherConfig::from_toml(&text).unwrap();
        assert_eq!(back.agents.definitions, config.agents.definitions);
        assert_eq!(back.guard(), config.guard());
    }
}
