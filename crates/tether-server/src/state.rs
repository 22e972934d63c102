//! Application state shared across handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tether_agent::AgentRegistry;
use tether_session::AdmissionController;
use tether_types::{SharedAuditLogger, SharedLogSink, TracingAuditLogger, TracingLogSink};

use crate::config::ServerConfig;
use crate::guard::ConnectionGuard;
use crate::media::MediaStore;
use crate::ratelimit::{SharedRateLimiter, create_rate_limiter};
use crate::script::ScriptRunner;

/// Application state shared across all handlers.
///
/// One instance per server; nothing here is global, so independent servers
/// (e.g. in tests) never share guard or admission state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Per-peer connection and message gate.
    pub guard: Arc<ConnectionGuard>,

    /// Session ceilings.
    pub admission: Arc<AdmissionController>,

    /// Agent id to process factory lookup.
    pub agents: Arc<AgentRegistry>,

    /// Structured log sink for lifecycle and security events.
    pub log: SharedLogSink,

    /// Records every stream message in and out.
    pub audit: SharedAuditLogger,

    /// Runs `script` requests.
    pub scripts: Arc<ScriptRunner>,

    /// Stores `media` uploads.
    pub media: Arc<MediaStore>,

    /// Management API rate limiter.
    pub api_limiter: SharedRateLimiter,

    /// Cancelled when the server shuts down; every stream token is a child.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create a new application state.
    pub fn new(config: ServerConfig, agents: AgentRegistry) -> Self {
        let log = TracingLogSink::shared();
        Self {
            guard: Arc::new(ConnectionGuard::with_log_sink(
                config.guard.clone(),
                log.clone(),
            )),
            admission: Arc::new(AdmissionController::new(config.admission.clone())),
            agents: Arc::new(agents),
            log,
            audit: Arc::new(TracingAuditLogger),
            scripts: Arc::new(ScriptRunner::new(config.script_timeout)),
            media: Arc::new(MediaStore::new(config.upload_dir.clone())),
            api_limiter: create_rate_limiter(config.api_rpm),
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
        }
    }

    /// Use a different log sink.
    ///
    /// Rebuilds the connection guard, so call it before serving.
    pub fn with_log_sink(mut self, log: SharedLogSink) -> Self {
        self.guard = Arc::new(ConnectionGuard::with_log_sink(
            self.config.guard.clone(),
            log.clone(),
        ));
        self.log = log;
        self
    }

    /// Use a different audit logger.
    pub fn with_audit_logger(mut self, audit: SharedAuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Use a different script runner.
    pub fn with_script_runner(mut self, runner: ScriptRunner) -> Self {
        self.scripts = Arc::new(runner);
        self
    }

    /// Access the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("agents", &self.agents)
            .finish_non_exhaustive()
    }
}
