//! Factories that start agent processes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tether_types::SharedLogSink;

use crate::command::AgentCommand;
use crate::error::Result;
use crate::process::AgentProcess;

/// Starts agent processes for one agent id.
pub trait ProcessAdapterFactory: Send + Sync {
    /// Agent id this factory serves.
    fn agent_id(&self) -> &str;

    /// Spawn a new process for `session_id`.
    ///
    /// The process is stopped when `cancel` fires.
    fn start(
        &self,
        session_id: &str,
        log: SharedLogSink,
        cancel: CancellationToken,
    ) -> Result<Arc<AgentProcess>>;
}

/// Shared factory type.
pub type SharedProcessFactory = Arc<dyn ProcessAdapterFactory>;

/// Factory that launches a fixed command line.
#[derive(Debug, Clone)]
pub struct CommandFactory {
    agent_id: String,
    command: AgentCommand,
}

impl CommandFactory {
    pub fn new(agent_id: impl Into<String>, command: AgentCommand) -> Self {
        Self {
            agent_id: agent_id.into(),
            command,
        }
    }

    pub fn command(&self) -> &AgentCommand {
        &self.command
    }
}

impl ProcessAdapterFactory for CommandFactory {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn start(
        &self,
        session_id: &str,
        log: SharedLogSink,
        cancel: CancellationToken,
    ) -> Result<Arc<AgentProcess>> {
        AgentProcess::spawn(&self.agent_id, &self.command, session_id, log, cancel)
    }
}
