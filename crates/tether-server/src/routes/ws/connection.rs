//! WebSocket stream lifecycle: single writer, read loop, teardown.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tether_agent::AgentProcess;
use tether_types::{LogLevel, LogRecord, SharedAuditLogger};

use super::COMPONENT;
use super::protocol::ServerMessage;
use crate::state::AppState;

/// Replies buffered between producers and the writer task.
const OUTBOUND_BUFFER: usize = 256;

/// How long teardown waits for queued replies to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Unique identifier for a WebSocket stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-stream session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SessionPhase {
    Idle,
    Starting,
    Running,
    Stopped,
    Errored,
}

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EndReason {
    Closed,
    Transport,
    Shutdown,
    Fault,
}

impl EndReason {
    fn describe(&self) -> &'static str {
        match self {
            EndReason::Closed => "stream closed without STOP",
            EndReason::Transport => "stream failed without STOP",
            EndReason::Shutdown => "server shut down",
            EndReason::Fault => "stream handler fault",
        }
    }
}

/// Handle producers use to queue replies for the stream's writer.
#[derive(Clone)]
pub(super) struct Outbound {
    tx: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
}

impl Outbound {
    /// Queue a reply. Returns false once the stream is closing.
    pub async fn send(&self, msg: ServerMessage) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(msg) => sent.is_ok(),
        }
    }
}

/// A TEXT payload waiting for the session's stdin writer.
pub(super) struct PendingInput {
    pub value: String,
    pub correlation: Option<String>,
}

/// The running session of a stream.
pub(super) struct ActiveSession {
    pub session_id: String,
    pub agent_id: String,
    pub process: Arc<AgentProcess>,
    /// Queue drained by the stdin writer; the read loop never writes stdin.
    pub input: mpsc::Sender<PendingInput>,
    /// Child of the stream token; cancelling it stops the forwarders.
    pub cancel: CancellationToken,
    /// Correlation id of the last START/TEXT; tags output lines.
    pub last_correlation: Arc<Mutex<Option<String>>>,
}

/// Everything owned by one stream's read loop.
pub(super) struct StreamContext {
    pub state: AppState,
    pub peer: String,
    pub stream_id: StreamId,
    pub outbound: Outbound,
    pub cancel: CancellationToken,
    pub phase: SessionPhase,
    pub session: Option<ActiveSession>,
    /// Session id seen by the writer for audit records.
    pub current_session: Arc<Mutex<Option<String>>>,
    /// Output forwarders, stdin writers, script and media jobs.
    pub tasks: JoinSet<()>,
}

impl StreamContext {
    /// Send a reply from the read loop.
    pub async fn reply(&self, msg: ServerMessage) {
        if !self.outbound.send(msg).await {
            tracing::debug!(stream_id = %self.stream_id, "reply dropped; stream closing");
        }
    }

    /// Log a finished background task; panics are reported rather than lost.
    pub fn supervise(&self, joined: Result<(), JoinError>) {
        match joined {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                let mut record = LogRecord::new(
                    LogLevel::Error,
                    "stream_task_failed",
                    format!("Background task failed: {}", e),
                    COMPONENT,
                )
                .with_details(serde_json::json!({
                    "peer": self.peer,
                    "stream_id": self.stream_id.to_string(),
                }));
                if let Some(session) = &self.session {
                    record = record.with_session(&session.session_id);
                }
                self.state.log.write(record);
            }
        }
    }

    /// Release everything the stream holds.
    async fn teardown(mut self, reason: EndReason) {
        self.cancel.cancel();

        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            session.process.stop();
            session.process.dispose();
            let registered = self
                .state
                .admission
                .unregister_session(&session.agent_id, &session.session_id);

            // an operator may already have terminated it
            if registered {
                self.abandon(&session, reason);
            }
        }
        *self.current_session.lock() = None;

        while let Some(joined) = self.tasks.join_next().await {
            self.supervise(joined);
        }
    }

    fn abandon(&self, session: &ActiveSession, reason: EndReason) {
        self.state.admission.mark_session_abandoned(
            &session.agent_id,
            &session.session_id,
            reason.describe(),
        );
        self.state.log.write(
            LogRecord::new(
                LogLevel::Warning,
                "session_abandoned",
                format!(
                    "Session '{}' torn down: {}",
                    session.session_id,
                    reason.describe()
                ),
                COMPONENT,
            )
            .with_session(&session.session_id)
            .with_details(serde_json::json!({
                "agent_id": session.agent_id,
                "peer": self.peer,
            })),
        );
    }
}

/// Drive one authenticated, admitted WebSocket until it ends.
pub async fn handle_socket(socket: WebSocket, state: AppState, peer: String) {
    let (sink, mut receiver) = socket.split();
    let stream_id = StreamId::new();
    let cancel = state.shutdown.child_token();
    let current_session = Arc::new(Mutex::new(None));

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let mut writer = tokio::spawn(write_loop(
        sink,
        rx,
        state.audit.clone(),
        Arc::clone(&current_session),
    ));

    tracing::debug!(stream_id = %stream_id, peer = %peer, "WebSocket stream opened");

    let mut stream = StreamContext {
        state: state.clone(),
        peer: peer.clone(),
        stream_id,
        outbound: Outbound {
            tx,
            cancel: cancel.clone(),
        },
        cancel: cancel.clone(),
        phase: SessionPhase::Idle,
        session: None,
        current_session,
        tasks: JoinSet::new(),
    };

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break EndReason::Shutdown,

            Some(joined) = stream.tasks.join_next(), if !stream.tasks.is_empty() => {
                stream.supervise(joined);
            }

            frame = receiver.next() => {
                let text = match frame {
                    None | Some(Ok(Message::Close(_))) => break EndReason::Closed,
                    Some(Err(e)) => {
                        tracing::debug!(stream_id = %stream_id, error = %e, "WebSocket read failed");
                        break EndReason::Transport;
                    }
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            stream
                                .reply(ServerMessage::error("Binary frames must contain UTF-8 JSON.", None))
                                .await;
                            continue;
                        }
                    },
                    // pings are answered by the transport
                    Some(Ok(_)) => continue,
                };

                let handled = AssertUnwindSafe(stream.on_frame(&text)).catch_unwind().await;
                if handled.is_err() {
                    state.log.write(
                        LogRecord::new(
                            LogLevel::Error,
                            "stream_fault",
                            "Unexpected fault while handling a message; closing stream",
                            COMPONENT,
                        )
                        .with_details(serde_json::json!({ "peer": peer, "stream_id": stream_id.to_string() })),
                    );
                    break EndReason::Fault;
                }
            }
        }
    };

    let phase = stream.phase;
    stream.teardown(reason).await;

    // all senders are gone; the writer drains what is queued and exits
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(stream_id = %stream_id, error = %e, "writer task failed"),
        Err(_) => {
            tracing::warn!(stream_id = %stream_id, "writer did not drain in time");
            writer.abort();
        }
    }

    state.guard.close_connection(&peer, COMPONENT);

    tracing::debug!(
        stream_id = %stream_id,
        peer = %peer,
        ?reason,
        ?phase,
        "WebSocket stream closed"
    );
}

/// The only task that writes to the socket.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
    audit: SharedAuditLogger,
    current_session: Arc<Mutex<Option<String>>>,
) {
    while let Some(msg) = rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize reply");
                continue;
            }
        };

        let session_id = current_session.lock().clone();
        audit.log_response(session_id.as_deref(), msg.kind(), &json);

        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
