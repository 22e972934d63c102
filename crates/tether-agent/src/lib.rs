//! Agent process adapter for tether.
//!
//! One [`AgentProcess`] wraps one spawned command-line agent: line-oriented
//! stdout/stderr readers, a stdin writer, exit detection, and idempotent
//! stop/dispose. [`ProcessAdapterFactory`] knows how to start a given agent,
//! and [`AgentRegistry`] maps agent ids to factories with a default fallback.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_agent::{AgentCommand, AgentRegistry, CommandFactory};
//!
//! let mut registry = AgentRegistry::new();
//! registry.register(CommandFactory::new("shell", AgentCommand::new("bash")));
//! let runner = registry.get_runner(None).expect("default agent");
//! let process = runner.start("abc", log_sink, cancel)?;
//! process.send_input("echo hi").await?;
//! ```

mod command;
mod error;
mod factory;
mod process;
mod registry;

pub use command::AgentCommand;
pub use error::{ProcessError, Result};
pub use factory::{CommandFactory, ProcessAdapterFactory, SharedProcessFactory};
pub use process::{AgentProcess, OutputLines, SESSION_ID_ENV};
pub use registry::AgentRegistry;
