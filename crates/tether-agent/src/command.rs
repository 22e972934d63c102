//! Command line used to launch an agent.

use std::collections::HashMap;
use std::path::PathBuf;

use tether_config::AgentDefinition;

/// Program, arguments and environment for one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCommand {
    /// Executable. `None` (or blank) means the agent is not configured.
    pub program: Option<String>,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory; inherits the server's when unset.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables layered over the server's environment.
    pub env: HashMap<String, String>,
}

impl AgentCommand {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
            ..Default::default()
        }
    }

    /// A command that always fails to start with "no agent configured".
    pub fn unconfigured() -> Self {
        Self::default()
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The program, if one is set and non-blank.
    pub fn program(&self) -> Option<&str> {
        self.program
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Whether this command can be spawned at all.
    pub fn is_configured(&self) -> bool {
        self.program().is_some()
    }

    /// Program and arguments joined for display.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program().unwrap_or("<none>").to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

impl From<&AgentDefinition> for AgentCommand {
    fn from(def: &AgentDefinition) -> Self {
        Self {
            program: def.command.clone(),
            args: def.args.clone(),
            working_dir: def.working_dir.clone(),
            env: def.env.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_program_is_unconfigured() {
        assert!(!AgentCommand::unconfigured().is_configured());
        assert!(!AgentCommand::new("   ").is_configured());
        assert!(AgentCommand::new("cat").is_configured());
    }

    #[test]
    fn test_builder_and_display() {
        let cmd = AgentCommand::new("claude")
            .with_args(["--print", "--verbose"])
            .with_env("TERM", "dumb")
            .with_working_dir("/tmp");

        assert_eq!(cmd.display(), "claude --print --verbose");
        assert_eq!(cmd.env.get("TERM").map(String::as_str), Some("dumb"));
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_from_definition() {
        let def = AgentDefinition {
            command: Some("bash".to_string()),
            args: vec!["-i".to_string()],
            working_dir: None,
            env: HashMap::new(),
        };
        let cmd = AgentCommand::from(&def);
        assert_eq!(cmd.program(), Some("bash"));
        assert_eq!(cmd.args, vec!["-i"]);
    }
}
