//! Shared types for the tether session gateway.
//!
//! The traits here are the seams between crates: the gateway, the process
//! adapter and the admission controller all talk to these instead of to each
//! other's concrete types.

pub mod audit;
pub mod handle;
pub mod ids;
pub mod log;

pub use audit::{AuditLogger, NoopAuditLogger, SharedAuditLogger, TracingAuditLogger};
pub use handle::{SessionHandle, SharedSessionHandle};
pub use ids::{MAX_SESSION_ID_LEN, generate_session_id, resolve_session_id, sanitize_session_id};
pub use log::{LogLevel, LogRecord, LogSink, SharedLogSink, TracingLogSink};
