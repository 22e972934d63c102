//! WebSocket message handlers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use tether_agent::{AgentProcess, OutputLines, ProcessError};
use tether_types::{LogLevel, LogRecord, SharedLogSink, SharedSessionHandle, resolve_session_id};

use super::COMPONENT;
use super::ansi::strip_ansi;
use super::connection::{ActiveSession, Outbound, PendingInput, SessionPhase, StreamContext};
use super::protocol::{
    ClientMessage, ClientPayload, ControlAction, EventKind, ServerMessage, salvage_correlation_id,
};
use crate::script::ScriptType;

/// Reply to TEXT when there is no live process.
pub const NOT_RUNNING: &str = "Agent not running. Send START first.";

/// Reply to STOP when there is no session.
pub const NO_ACTIVE_SESSION: &str = "No active session.";

/// Reply to TEXT when the agent is not keeping up with its input.
pub const INPUT_QUEUE_FULL: &str = "Agent input queue is full; input dropped.";

/// TEXT payloads buffered per session ahead of the stdin writer.
const INPUT_BUFFER: usize = 32;

/// How long the stdout forwarder waits for the exit status after EOF.
const EXIT_POLL: Duration = Duration::from_millis(50);
const EXIT_POLL_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl StreamContext {
    /// Handle one inbound text frame.
    pub(super) async fn on_frame(&mut self, raw: &str) {
        if let Err(denial) = self.state.guard.check_client_message(&self.peer, COMPONENT) {
            tracing::debug!(peer = %self.peer, reason = %denial, "message dropped");
            return;
        }

        let msg: ClientMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                self.state.audit.log_request(self.session_id(), "invalid", raw);
                self.reply(ServerMessage::error(
                    format!("Invalid message: {}", e),
                    salvage_correlation_id(raw),
                ))
                .await;
                return;
            }
        };

        self.state
            .audit
            .log_request(self.session_id(), msg.payload.kind(), raw);

        let correlation = msg.correlation_id;
        match msg.payload {
            ClientPayload::Control {
                action: ControlAction::Start,
                session_id,
                agent_id,
            } => {
                self.handle_start(correlation, session_id, agent_id).await;
            }
            ClientPayload::Control {
                action: ControlAction::Stop,
                ..
            } => self.handle_stop(correlation).await,
            ClientPayload::Text { value } => self.handle_text(correlation, value).await,
            ClientPayload::Script {
                path_or_command,
                script_type,
            } => self.handle_script(correlation, path_or_command, script_type),
            ClientPayload::Media {
                content,
                content_type,
                file_name,
            } => self.handle_media(correlation, content, content_type, file_name),
        }
    }

    fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    fn log(&self, level: LogLevel, event_type: &str, message: String, correlation: Option<&str>) {
        let mut record = LogRecord::new(level, event_type, message, COMPONENT)
            .with_correlation(correlation)
            .with_details(serde_json::json!({ "peer": self.peer }));
        if let Some(session_id) = self.session_id() {
            record = record.with_session(session_id);
        }
        self.state.log.write(record);
    }

    async fn fail_start(&mut self, message: String, correlation: Option<String>) {
        self.phase = SessionPhase::Errored;
        self.log(
            LogLevel::Warning,
            "session_error",
            message.clone(),
            correlation.as_deref(),
        );
        self.reply(ServerMessage::event(
            EventKind::SessionError,
            message,
            correlation,
        ))
        .await;
    }

    async fn handle_start(
        &mut self,
        correlation: Option<String>,
        requested_session: Option<String>,
        requested_agent: Option<String>,
    ) {
        if let Some(session) = &self.session
            && session.process.is_running()
        {
            let text = format!("Session '{}' is already running.", session.session_id);
            self.reply(ServerMessage::error(text, correlation)).await;
            return;
        }
        // exited or terminated by an operator; free it before starting anew
        if let Some(stale) = self.session.take() {
            self.release(&stale);
        }

        self.phase = SessionPhase::Starting;

        let Some(runner) = self.state.agents.get_runner(requested_agent.as_deref()) else {
            self.fail_start(ProcessError::NotConfigured.to_string(), correlation)
                .await;
            return;
        };
        let agent_id = runner.agent_id().to_string();
        let session_id = resolve_session_id(requested_session.as_deref());

        if let Err(e) = self
            .state
            .admission
            .try_register_session(&agent_id, &session_id, None)
        {
            self.fail_start(e.to_string(), correlation).await;
            return;
        }

        let session_cancel = self.cancel.child_token();
        let process = match runner.start(&session_id, self.state.log.clone(), session_cancel.clone())
        {
            Ok(process) => process,
            Err(e) => {
                self.state
                    .admission
                    .unregister_session(&agent_id, &session_id);
                self.fail_start(e.to_string(), correlation).await;
                return;
            }
        };

        let handle: SharedSessionHandle = process.clone();
        self.state
            .admission
            .attach_handle(&agent_id, &session_id, handle);

        let last_correlation = Arc::new(Mutex::new(correlation.clone()));
        let stdout = process.take_stdout();
        let stderr = process.take_stderr();
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);

        self.session = Some(ActiveSession {
            session_id: session_id.clone(),
            agent_id: agent_id.clone(),
            process: Arc::clone(&process),
            input: input_tx,
            cancel: session_cancel.clone(),
            last_correlation: Arc::clone(&last_correlation),
        });
        self.phase = SessionPhase::Running;
        *self.current_session.lock() = Some(session_id.clone());

        self.log(
            LogLevel::Info,
            "session_started",
            format!("Session '{}' started with agent '{}'", session_id, agent_id),
            correlation.as_deref(),
        );
        self.reply(ServerMessage::event(
            EventKind::SessionStarted,
            format!("Session '{}' started with agent '{}'.", session_id, agent_id),
            correlation,
        ))
        .await;

        self.tasks.spawn(write_input(
            Arc::clone(&process),
            input_rx,
            self.outbound.clone(),
            self.state.log.clone(),
            session_cancel.clone(),
        ));
        if let Some(lines) = stdout {
            self.tasks.spawn(forward_lines(
                lines,
                OutputStream::Stdout,
                self.outbound.clone(),
                Arc::clone(&last_correlation),
                session_cancel.clone(),
                Some((Arc::clone(&process), self.state.log.clone())),
            ));
        }
        if let Some(lines) = stderr {
            self.tasks.spawn(forward_lines(
                lines,
                OutputStream::Stderr,
                self.outbound.clone(),
                last_correlation,
                session_cancel,
                None,
            ));
        }
    }

    async fn handle_stop(&mut self, correlation: Option<String>) {
        let Some(session) = self.session.take() else {
            self.reply(ServerMessage::error(NO_ACTIVE_SESSION, correlation))
                .await;
            return;
        };

        self.release(&session);
        self.phase = SessionPhase::Stopped;

        self.state.log.write(
            LogRecord::new(
                LogLevel::Info,
                "session_stopped",
                format!("Session '{}' stopped", session.session_id),
                COMPONENT,
            )
            .with_session(&session.session_id)
            .with_correlation(correlation.as_deref()),
        );
        self.reply(ServerMessage::event(
            EventKind::SessionStopped,
            format!("Session '{}' stopped.", session.session_id),
            correlation,
        ))
        .await;
    }

    fn release(&self, session: &ActiveSession) {
        session.cancel.cancel();
        session.process.stop();
        session.process.dispose();
        self.state
            .admission
            .unregister_session(&session.agent_id, &session.session_id);
        *self.current_session.lock() = None;
    }

    async fn handle_text(&mut self, correlation: Option<String>, value: String) {
        let Some(session) = self.session.as_ref().filter(|s| s.process.is_running()) else {
            self.reply(ServerMessage::error(NOT_RUNNING, correlation)).await;
            return;
        };

        *session.last_correlation.lock() = correlation.clone();

        let pending = PendingInput {
            value,
            correlation,
        };
        match session.input.try_send(pending) {
            Ok(()) => {}
            Err(TrySendError::Full(pending)) => {
                self.log(
                    LogLevel::Warning,
                    "input_dropped",
                    INPUT_QUEUE_FULL.to_string(),
                    pending.correlation.as_deref(),
                );
                self.reply(ServerMessage::error(INPUT_QUEUE_FULL, pending.correlation))
                    .await;
            }
            Err(TrySendError::Closed(pending)) => {
                self.reply(ServerMessage::error(NOT_RUNNING, pending.correlation))
                    .await;
            }
        }
    }

    fn handle_script(
        &mut self,
        correlation: Option<String>,
        path_or_command: String,
        script_type: ScriptType,
    ) {
        let runner = Arc::clone(&self.state.scripts);
        let outbound = self.outbound.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = runner.run(script_type, &path_or_command) => result,
            };

            match result {
                Ok(outcome) => {
                    let stdout = strip_ansi(outcome.stdout.trim_end()).into_owned();
                    let text = if stdout.is_empty() {
                        "(no output)".to_string()
                    } else {
                        stdout
                    };
                    outbound.send(ServerMessage::info(text, correlation.clone())).await;

                    let stderr = strip_ansi(outcome.stderr.trim_end()).into_owned();
                    if !outcome.success() || !stderr.is_empty() {
                        let status = match outcome.exit_code {
                            Some(code) => format!("exit code {}", code),
                            None => "terminated by signal".to_string(),
                        };
                        let text = if stderr.is_empty() {
                            format!("Script failed ({})", status)
                        } else {
                            format!("{} ({})", stderr, status)
                        };
                        outbound.send(ServerMessage::error(text, correlation)).await;
                    }
                }
                Err(e) => {
                    outbound
                        .send(ServerMessage::error(e.to_string(), correlation))
                        .await;
                }
            }
        });
    }

    fn handle_media(
        &mut self,
        correlation: Option<String>,
        content: String,
        content_type: String,
        file_name: String,
    ) {
        let store = Arc::clone(&self.state.media);
        let outbound = self.outbound.clone();
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = store.save(&file_name, &content_type, &content) => result,
            };

            let reply = match result {
                Ok(saved) => ServerMessage::info(
                    format!(
                        "Saved {} ({} bytes) to {}",
                        saved.file_name,
                        saved.bytes,
                        saved.path.display()
                    ),
                    correlation,
                ),
                Err(e) => ServerMessage::error(e.to_string(), correlation),
            };
            outbound.send(reply).await;
        });
    }
}

/// Feed queued TEXT payloads to the agent's stdin until cancelled.
///
/// A stalled write only blocks this task; STOP and stream end still cancel it.
async fn write_input(
    process: Arc<AgentProcess>,
    mut inputs: mpsc::Receiver<PendingInput>,
    outbound: Outbound,
    log: SharedLogSink,
    cancel: CancellationToken,
) {
    loop {
        let input = tokio::select! {
            _ = cancel.cancelled() => return,
            input = inputs.recv() => match input {
                Some(input) => input,
                None => return,
            },
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = process.send_input(&input.value) => result,
        };

        let text = match result {
            Ok(()) => continue,
            Err(ProcessError::NotRunning) => NOT_RUNNING.to_string(),
            Err(e) => {
                let text = e.to_string();
                log.write(
                    LogRecord::new(LogLevel::Warning, "input_write_failed", text.clone(), COMPONENT)
                        .with_session(process.session_id())
                        .with_correlation(input.correlation.as_deref()),
                );
                text
            }
        };
        if !outbound.send(ServerMessage::error(text, input.correlation)).await {
            return;
        }
    }
}

/// Stream one output pipe back to the client until EOF or cancellation.
///
/// Each line is tagged with the correlation id of the most recent input.
/// The stdout forwarder also reports the exit status once the pipe closes.
async fn forward_lines(
    mut lines: OutputLines,
    stream: OutputStream,
    outbound: Outbound,
    last_correlation: Arc<Mutex<Option<String>>>,
    cancel: CancellationToken,
    exit_report: Option<(Arc<AgentProcess>, SharedLogSink)>,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                if cancel.is_cancelled() {
                    return;
                }
                let text = strip_ansi(&line).into_owned();
                let correlation = last_correlation.lock().clone();
                let msg = match stream {
                    OutputStream::Stdout => ServerMessage::output(text, correlation),
                    OutputStream::Stderr => ServerMessage::error(text, correlation),
                };
                if !outbound.send(msg).await {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(?stream, error = %e, "agent output read failed");
                break;
            }
        }
    }

    let Some((process, log)) = exit_report else {
        return;
    };
    for _ in 0..EXIT_POLL_ATTEMPTS {
        if process.has_exited() || cancel.is_cancelled() {
            break;
        }
        tokio::time::sleep(EXIT_POLL).await;
    }
    if cancel.is_cancelled() {
        return;
    }
    let exit = match process.exit_code() {
        Some(code) => format!("exit code {}", code),
        None if process.has_exited() => "no exit code".to_string(),
        None => "still running with stdout closed".to_string(),
    };
    log.write(
        LogRecord::new(
            LogLevel::Info,
            "process_exited",
            format!("Agent '{}' output ended ({})", process.agent_id(), exit),
            COMPONENT,
        )
        .with_session(process.session_id())
        .with_details(serde_json::json!({ "exit_code": process.exit_code() })),
    );
}
