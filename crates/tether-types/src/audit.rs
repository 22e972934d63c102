//! Request/response audit logging.
//!
//! The gateway records every inbound and outbound stream message through an
//! [`AuditLogger`]. `kind` is the message discriminator (`control`, `text`,
//! `output`, ...) and `payload` is the serialized frame.

use std::sync::Arc;

/// Records requests and responses exchanged on a session stream.
pub trait AuditLogger: Send + Sync {
    /// Record an inbound message.
    fn log_request(&self, session_id: Option<&str>, kind: &str, payload: &str);

    /// Record an outbound message.
    fn log_response(&self, session_id: Option<&str>, kind: &str, payload: &str);
}

/// Shared audit logger type.
pub type SharedAuditLogger = Arc<dyn AuditLogger>;

/// Audit logger that emits `tracing` debug events under the `tether::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log_request(&self, session_id: Option<&str>, kind: &str, payload: &str) {
        tracing::debug!(
            target: "tether::audit",
            direction = "request",
            session_id = session_id.unwrap_or(""),
            kind,
            payload,
            "stream message"
        );
    }

    fn log_response(&self, session_id: Option<&str>, kind: &str, payload: &str) {
        tracing::debug!(
            target: "tether::audit",
            direction = "response",
            session_id = session_id.unwrap_or(""),
            kind,
            payload,
            "stream message"
        );
    }
}

/// Audit logger that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditLogger;

impl AuditLogger for NoopAuditLogger {
    fn log_request(&self, _session_id: Option<&str>, _kind: &str, _payload: &str) {}

    fn log_response(&self, _session_id: Option<&str>, _kind: &str, _payload: &str) {}
}
