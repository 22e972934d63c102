//! WebSocket protocol types for client-server communication.
//!
//! Every frame is a JSON object discriminated by `type`. Both directions carry
//! an optional `correlation_id`; a reply always echoes the id of the request
//! that caused it.

use serde::{Deserialize, Serialize};

use crate::script::ScriptType;

/// Messages from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Opaque client token echoed on every reply this message causes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(flatten)]
    pub payload: ClientPayload,
}

/// Inbound message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientPayload {
    /// Start or stop the stream's session.
    Control {
        action: ControlAction,
        /// Requested session id; sanitized, or generated when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Agent to run; the registry default when absent or unknown.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
    /// A line for the agent's stdin.
    Text { value: String },
    /// Run a script outside the session.
    Script {
        path_or_command: String,
        #[serde(default)]
        script_type: ScriptType,
    },
    /// Upload a file (base64 content).
    Media {
        content: String,
        content_type: String,
        file_name: String,
    },
}

impl ClientPayload {
    /// Discriminator used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientPayload::Control { .. } => "control",
            ClientPayload::Text { .. } => "text",
            ClientPayload::Script { .. } => "script",
            ClientPayload::Media { .. } => "media",
        }
    }
}

/// Control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    #[serde(alias = "START")]
    Start,
    #[serde(alias = "STOP")]
    Stop,
}

/// Delivery priority hint for clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SessionStopped,
    SessionError,
}

/// Messages from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(flatten)]
    pub payload: ServerPayload,

    pub priority: Priority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Outbound message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPayload {
    Event {
        kind: EventKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Output {
        text: String,
    },
    Error {
        text: String,
    },
}

impl ServerMessage {
    /// A lifecycle event (high priority).
    pub fn event(
        kind: EventKind,
        message: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            payload: ServerPayload::Event {
                kind,
                message: Some(message.into()),
            },
            priority: Priority::High,
            correlation_id,
        }
    }

    /// Agent output (normal priority).
    pub fn output(text: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            payload: ServerPayload::Output { text: text.into() },
            priority: Priority::Normal,
            correlation_id,
        }
    }

    /// Informational output such as script and upload results (low priority).
    pub fn info(text: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            payload: ServerPayload::Output { text: text.into() },
            priority: Priority::Low,
            correlation_id,
        }
    }

    /// An error (high priority).
    pub fn error(text: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            payload: ServerPayload::Error { text: text.into() },
            priority: Priority::High,
            correlation_id,
        }
    }

    /// Discriminator used in audit records.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            ServerPayload::Event { .. } => "event",
            ServerPayload::Output { .. } => "output",
            ServerPayload::Error { .. } => "error",
        }
    }
}

/// Best-effort correlation id from a frame that failed to parse.
pub fn salvage_correlation_id(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("correlation_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
