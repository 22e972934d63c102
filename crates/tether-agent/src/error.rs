//! Error types for agent processes.

/// Error type for agent process operations.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The agent has no command to run.
    #[error("No agent configured")]
    NotConfigured,

    /// The OS refused to spawn the process.
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// A stdio pipe could not be captured after spawning.
    #[error("Failed to capture agent {0}")]
    MissingPipe(&'static str),

    /// The process has exited (or was stopped) so it cannot take input.
    #[error("Agent process is not running")]
    NotRunning,

    /// Writing to stdin failed (typically a broken pipe).
    #[error("Failed to write to agent stdin: {0}")]
    Write(#[source] std::io::Error),
}

/// Result type for agent process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;
