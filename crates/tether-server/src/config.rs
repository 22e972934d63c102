//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use tether_config::{TetherConfig, defaults};
use tether_session::AdmissionConfig;

use crate::error::{Result, ServerError};
use crate::guard::GuardConfig;

/// Default bind port.
pub const DEFAULT_PORT: u16 = 7420;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// API key expected in `x-api-key`. `None` means loopback peers only.
    pub api_key: Option<String>,

    /// Enable the management API rate limiter.
    pub rate_limiting: bool,

    /// Management API requests per minute.
    pub api_rpm: u32,

    /// Enable request logging.
    pub request_logging: bool,

    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,

    /// Directory media uploads are written to.
    pub upload_dir: PathBuf,

    /// Upper bound on one script run.
    pub script_timeout: Duration,

    /// Connection guard thresholds.
    pub guard: GuardConfig,

    /// Session ceilings.
    pub admission: AdmissionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            api_key: None,
            rate_limiting: true,
            api_rpm: defaults::API_RPM,
            request_logging: true,
            max_message_size: defaults::MAX_MESSAGE_SIZE,
            upload_dir: PathBuf::from(defaults::UPLOAD_DIR),
            script_timeout: Duration::from_secs(defaults::SCRIPT_TIMEOUT_SECS),
            guard: GuardConfig::default(),
            admission: AdmissionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server config with an optional API key.
    /// Pass `None` to accept loopback peers only.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            ..Default::default()
        }
    }

    /// Build from a loaded [`TetherConfig`].
    pub fn from_tether_config(config: &TetherConfig) -> Result<Self> {
        let server = config.server();
        let bind_address = server.bind.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address '{}': {}", server.bind, e))
        })?;

        Ok(Self {
            bind_address,
            api_key: server.api_key.filter(|k| !k.is_empty()),
            rate_limiting: server.rate_limiting,
            api_rpm: server.api_rpm,
            request_logging: server.request_logging,
            max_message_size: server.max_message_size,
            upload_dir: server.upload_dir,
            script_timeout: Duration::from_secs(server.script_timeout_secs),
            guard: GuardConfig::from(&config.guard()),
            admission: AdmissionConfig::from(&config.admission()),
        })
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    /// Enable or disable rate limiting.
    pub fn with_rate_limiting(mut self, enabled: bool) -> Self {
        self.rate_limiting = enabled;
        self
    }

    /// Set the management API rate.
    pub fn with_api_rpm(mut self, rpm: u32) -> Self {
        self.api_rpm = rpm;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    /// Set the maximum inbound WebSocket message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the upload directory.
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    /// Set the script timeout.
    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    /// Set the guard thresholds.
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    /// Set the session ceilings.
    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }
}
