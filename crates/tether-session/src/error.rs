//! Error types for admission control.

/// Reasons a session registration or termination can fail.
///
/// The `Display` strings are sent to clients verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The server-wide ceiling is reached.
    #[error("Server session limit reached ({0})")]
    ServerLimit(usize),

    /// The agent's own ceiling is reached.
    #[error("Agent '{agent_id}' session limit reached ({limit})")]
    AgentLimit { agent_id: String, limit: usize },

    /// A session with this id is already registered.
    #[error("Session '{0}' is already active")]
    AlreadyActive(String),

    /// No session with this id is registered.
    #[error("Session not found: {0}")]
    NotFound(String),
}

impl AdmissionError {
    /// Whether the caller may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerLimit(_) | Self::AgentLimit { .. })
    }
}

/// Result type for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;
