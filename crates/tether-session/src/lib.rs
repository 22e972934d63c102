//! Admission control for agent sessions.
//!
//! The [`AdmissionController`] bounds how many sessions may run at once, both
//! server-wide and per agent id, and remembers sessions whose controlling
//! stream went away without a clean STOP.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_session::{AdmissionConfig, AdmissionController};
//!
//! let config = AdmissionConfig::default()
//!     .with_max_sessions(4)
//!     .with_agent_limit("claude", 2);
//!
//! let admission = AdmissionController::new(config);
//! admission.try_register_session("claude", "abc", None)?;
//! ```

mod admission;
mod config;
mod error;

pub use admission::{
    AbandonedSession, AdmissionController, AgentCapacity, CapacityStatus, ServerCapacity,
    SessionInfo, TerminatedSession,
};
pub use config::AdmissionConfig;
pub use error::{AdmissionError, Result};
