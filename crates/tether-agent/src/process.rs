//! A spawned agent process.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use tether_types::{LogLevel, LogRecord, SessionHandle, SharedLogSink};

use crate::command::AgentCommand;
use crate::error::{ProcessError, Result};

/// Environment variable carrying the session id into the agent process.
pub const SESSION_ID_ENV: &str = "TETHER_SESSION_ID";

const COMPONENT: &str = "agent_process";

/// Line reader over one of the process's output pipes.
///
/// Invalid UTF-8 is replaced rather than treated as an error so a binary blob
/// on stdout cannot kill the forwarder.
pub struct OutputLines {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    buf: Vec<u8>,
}

impl OutputLines {
    /// Wrap any async reader.
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader)),
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at EOF.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

impl std::fmt::Debug for OutputLines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLines").finish_non_exhaustive()
    }
}

/// One running agent process.
///
/// Readers are handed out once via [`take_stdout`](Self::take_stdout) and
/// [`take_stderr`](Self::take_stderr) so two independent tasks can drain them.
/// Input goes through [`send_input`](Self::send_input).
pub struct AgentProcess {
    agent_id: String,
    session_id: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<OutputLines>>,
    stderr: Mutex<Option<OutputLines>>,
    exit_status: Mutex<Option<ExitStatus>>,
    exited: AtomicBool,
    stopped: AtomicBool,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    log: SharedLogSink,
}

impl AgentProcess {
    /// Spawn `command` for `session_id`.
    ///
    /// Cancelling `cancel` stops the process. Must be called from inside a
    /// tokio runtime.
    pub fn spawn(
        agent_id: &str,
        command: &AgentCommand,
        session_id: &str,
        log: SharedLogSink,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let program = command.program().ok_or(ProcessError::NotConfigured)?;

        let mut cmd = Command::new(program);
        cmd.args(&command.args)
            .envs(&command.env)
            .env(SESSION_ID_ENV, session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: program.to_string(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingPipe("stderr"))?;
        let pid = child.id();

        let process = Arc::new(Self {
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            pid,
            child: Mutex::new(Some(child)),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            stdout: Mutex::new(Some(OutputLines::new(stdout))),
            stderr: Mutex::new(Some(OutputLines::new(stderr))),
            exit_status: Mutex::new(None),
            exited: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            log,
        });

        process.watch_cancellation(cancel);

        process.log.write(
            LogRecord::new(
                LogLevel::Info,
                "process_started",
                format!("Started agent '{}': {}", agent_id, command.display()),
                COMPONENT,
            )
            .with_session(session_id)
            .with_details(serde_json::json!({ "pid": pid, "agent_id": agent_id })),
        );

        Ok(process)
    }

    fn watch_cancellation(self: &Arc<Self>, cancel: CancellationToken) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(process) = weak.upgrade() {
                        process.stop();
                    }
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }

    /// Agent id this process was started for.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Session id this process was started for.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// OS process id, if the OS reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the stdout reader. Returns `None` after the first call.
    pub fn take_stdout(&self) -> Option<OutputLines> {
        self.stdout.lock().take()
    }

    /// Take the stderr reader. Returns `None` after the first call.
    pub fn take_stderr(&self) -> Option<OutputLines> {
        self.stderr.lock().take()
    }

    /// Whether the process has exited (or its handle has been released).
    pub fn has_exited(&self) -> bool {
        if self.exited.load(Ordering::Acquire) {
            return true;
        }

        let mut guard = self.child.lock();
        let Some(child) = guard.as_mut() else {
            self.exited.store(true, Ordering::Release);
            return true;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                *self.exit_status.lock() = Some(status);
                self.exited.store(true, Ordering::Release);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(session_id = %self.session_id, error = %e, "try_wait failed");
                self.exited.store(true, Ordering::Release);
                true
            }
        }
    }

    /// Whether the process can still accept input.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && !self.has_exited()
    }

    /// Exit code once the process has been observed to exit.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.lock().and_then(|s| s.code())
    }

    /// Write `text` to stdin, terminated by a newline.
    pub async fn send_input(&self, text: &str) -> Result<()> {
        if !self.is_running() {
            return Err(ProcessError::NotRunning);
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ProcessError::NotRunning)?;

        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(ProcessError::Write)?;
        if !text.ends_with('\n') {
            stdin.write_all(b"\n").await.map_err(ProcessError::Write)?;
        }
        stdin.flush().await.map_err(ProcessError::Write)?;

        if self.disposed.load(Ordering::Acquire) {
            guard.take();
        }
        Ok(())
    }

    /// Best-effort kill. Calling it again is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut guard = self.child.lock();
            if let Some(child) = guard.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        *self.exit_status.lock() = Some(status);
                        self.exited.store(true, Ordering::Release);
                    }
                    _ => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!(
                                session_id = %self.session_id,
                                error = %e,
                                "kill failed; process probably already gone"
                            );
                        }
                    }
                }
            }
        }

        self.log.write(
            LogRecord::new(
                LogLevel::Info,
                "process_stopped",
                format!("Stopped agent '{}'", self.agent_id),
                COMPONENT,
            )
            .with_session(&self.session_id),
        );
    }

    /// Release stdio and the child handle. Calling it again is a no-op.
    ///
    /// A process that is still alive at this point is killed.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.cancel();

        // An in-flight send_input holds the lock; it drops stdin itself once
        // it sees the disposed flag.
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }
        self.stdout.lock().take();
        self.stderr.lock().take();

        if let Some(mut child) = self.child.lock().take() {
            match child.try_wait() {
                Ok(Some(status)) => *self.exit_status.lock() = Some(status),
                _ => {
                    let _ = child.start_kill();
                }
            }
        }
        self.exited.store(true, Ordering::Release);

        tracing::debug!(session_id = %self.session_id, "agent process disposed");
    }
}

impl SessionHandle for AgentProcess {
    fn stop(&self) {
        AgentProcess::stop(self);
    }

    fn dispose(&self) {
        AgentProcess::dispose(self);
    }
}

impl std::fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentProcess")
            .field("agent_id", &self.agent_id)
            .field("session_id", &self.session_id)
            .field("pid", &self.pid)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}
