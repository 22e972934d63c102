//! Fire-and-forget script execution for `script` requests.
//!
//! A script is either a path to an existing file or an inline command. It runs
//! to completion (no streaming) under the configured timeout and its captured
//! output is returned in one piece.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;

/// Interpreter for a script request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    #[default]
    Bash,
    Pwsh,
}

impl ScriptType {
    fn program(&self) -> &'static str {
        match self {
            ScriptType::Bash => "bash",
            ScriptType::Pwsh => "pwsh",
        }
    }
}

/// Errors from running a script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Script is empty")]
    Empty,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: &'static str,
        source: std::io::Error,
    },

    #[error("Script timed out after {0}s")]
    Timeout(u64),
}

/// Captured result of a finished script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ScriptOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs bash or PowerShell scripts.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ScriptRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            working_dir: None,
        }
    }

    /// Run scripts from `dir` instead of the server's working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, script_type: ScriptType, path_or_command: &str) -> Command {
        let program = script_type.program();
        let mut cmd = Command::new(program);
        let is_file = Path::new(path_or_command).is_file();

        match (script_type, is_file) {
            (ScriptType::Bash, true) => {
                cmd.arg(path_or_command);
            }
            (ScriptType::Bash, false) => {
                cmd.arg("-c").arg(path_or_command);
            }
            (ScriptType::Pwsh, true) => {
                cmd.args(["-NoProfile", "-NonInteractive", "-File", path_or_command]);
            }
            (ScriptType::Pwsh, false) => {
                cmd.args(["-NoProfile", "-NonInteractive", "-Command", path_or_command]);
            }
        }

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run a script to completion.
    pub async fn run(
        &self,
        script_type: ScriptType,
        path_or_command: &str,
    ) -> Result<ScriptOutcome, ScriptError> {
        let path_or_command = path_or_command.trim();
        if path_or_command.is_empty() {
            return Err(ScriptError::Empty);
        }

        let program = script_type.program();
        let child = self
            .command(script_type, path_or_command)
            .spawn()
            .map_err(|source| ScriptError::Spawn { program, source })?;

        tracing::debug!(program, script = path_or_command, "Running script");

        // Dropping the future on timeout kills the child.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(ScriptError::Spawn { program, source }),
            Err(_) => return Err(ScriptError::Timeout(self.timeout.as_secs())),
        };

        Ok(ScriptOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
