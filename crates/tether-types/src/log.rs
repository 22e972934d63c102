//! Structured log sink.
//!
//! Components report lifecycle and security events through a [`LogSink`]
//! rather than calling `tracing` directly, so an embedding application can
//! route them to its own store. [`TracingLogSink`] is the default and simply
//! forwards every record to `tracing` with structured fields.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One structured log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Severity.
    pub level: LogLevel,
    /// Machine-readable event type (e.g. `session_started`, `peer_banned`).
    pub event_type: String,
    /// Human-readable message.
    pub message: String,
    /// Component that produced the record (e.g. `gateway`, `guard`).
    pub component: String,
    /// Session the record relates to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Correlation id of the request that triggered the record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Arbitrary structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogRecord {
    /// Create a record with the required fields.
    pub fn new(
        level: LogLevel,
        event_type: impl Into<String>,
        message: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            level,
            event_type: event_type.into(),
            message: message.into(),
            component: component.into(),
            session_id: None,
            correlation_id: None,
            details: None,
        }
    }

    /// Attach a session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a correlation id if one is present.
    pub fn with_correlation(mut self, correlation_id: Option<&str>) -> Self {
        self.correlation_id = correlation_id.map(str::to_string);
        self
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Destination for structured log records.
///
/// Implementations must be cheap to call from hot paths; they are invoked
/// synchronously by the guard and the gateway.
pub trait LogSink: Send + Sync {
    /// Write one record.
    fn write(&self, record: LogRecord);
}

/// Shared log sink type.
pub type SharedLogSink = Arc<dyn LogSink>;

/// Log sink that forwards records to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl TracingLogSink {
    /// Create a shared tracing sink.
    pub fn shared() -> SharedLogSink {
        Arc::new(Self)
    }
}

impl LogSink for TracingLogSink {
    fn write(&self, record: LogRecord) {
        let session_id = record.session_id.as_deref().unwrap_or("");
        let correlation_id = record.correlation_id.as_deref().unwrap_or("");
        let details = record
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();

        macro_rules! emit {
            ($macro:ident) => {
                tracing::$macro!(
                    event_type = %record.event_type,
                    component = %record.component,
                    session_id,
                    correlation_id,
                    details = %details,
                    "{}",
                    record.message
                )
            };
        }

        match record.level {
            LogLevel::Debug => emit!(debug),
            LogLevel::Info => emit!(info),
            LogLevel::Warning => emit!(warn),
            LogLevel::Error => emit!(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSink(Mutex<Vec<LogRecord>>);

    impl LogSink for CapturingSink {
        fn write(&self, record: LogRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    #[test]
    fn test_record_builder() {
        let record = LogRecord::new(LogLevel::Info, "session_started", "started", "gateway")
            .with_session("abc")
            .with_correlation(Some("c1"))
            .with_details(serde_json::json!({"agent_id": "claude"}));

        assert_eq!(record.session_id.as_deref(), Some("abc"));
        assert_eq!(record.correlation_id.as_deref(), Some("c1"));
        assert_eq!(record.details.unwrap()["agent_id"], "claude");
    }

    #[test]
    fn test_record_without_correlation() {
        let record =
            LogRecord::new(LogLevel::Debug, "x", "y", "z").with_correlation(None);
        assert!(record.correlation_id.is_none());

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("correlation_id"));
        assert!(json.contains(r#""level":"debug""#));
    }

    #[test]
    fn test_sink_is_object_safe() {
        let sink = Arc::new(CapturingSink::default());
        let shared: SharedLogSink = sink.clone();
        shared.write(LogRecord::new(LogLevel::Warning, "e", "m", "c"));
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingLogSink.write(LogRecord::new(LogLevel::Error, "e", "m", "c"));
    }

    #[test]
    fn test_level_ordering_and_display() {
        assert!(LogLevel::Error > LogLevel::Warning);
        assert_eq!(LogLevel::Warning.to_string(), "warning");
    }
}
