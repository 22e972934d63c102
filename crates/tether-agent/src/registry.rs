//! Agent id to factory lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tether_config::AgentsSection;

use crate::command::AgentCommand;
use crate::factory::{CommandFactory, ProcessAdapterFactory, SharedProcessFactory};

/// Registry of agent runners keyed by agent id.
///
/// Lookups without an id (or with an unknown one) fall back to the default
/// agent. When no default is set and exactly one runner is registered, that
/// runner is the default.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    runners: BTreeMap<String, SharedProcessFactory>,
    default_agent: Option<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the `[agents]` config table.
    pub fn from_config(agents: &AgentsSection) -> Self {
        let mut registry = Self::new();
        for (id, def) in &agents.definitions {
            registry.register(CommandFactory::new(id.clone(), AgentCommand::from(def)));
        }
        registry.default_agent = agents.default.clone();
        registry
    }

    /// Register a runner, replacing any previous one with the same id.
    pub fn register(&mut self, factory: impl ProcessAdapterFactory + 'static) {
        self.register_shared(Arc::new(factory));
    }

    /// Register an already-shared runner.
    pub fn register_shared(&mut self, factory: SharedProcessFactory) {
        let id = factory.agent_id().to_string();
        if self.runners.insert(id.clone(), factory).is_some() {
            tracing::debug!(agent_id = %id, "replaced agent runner");
        }
    }

    /// Set the default agent id.
    pub fn with_default(mut self, agent_id: impl Into<String>) -> Self {
        self.default_agent = Some(agent_id.into());
        self
    }

    /// The agent id a lookup for `agent_id` would resolve to.
    pub fn resolve_id(&self, agent_id: Option<&str>) -> Option<&str> {
        if let Some(id) = agent_id.map(str::trim).filter(|id| !id.is_empty())
            && let Some((key, _)) = self.runners.get_key_value(id)
        {
            return Some(key);
        }
        if let Some(default) = &self.default_agent
            && let Some((key, _)) = self.runners.get_key_value(default.as_str())
        {
            return Some(key);
        }
        if self.runners.len() == 1 {
            return self.runners.keys().next().map(String::as_str);
        }
        None
    }

    /// Runner for `agent_id`, or the default runner.
    pub fn get_runner(&self, agent_id: Option<&str>) -> Option<SharedProcessFactory> {
        self.resolve_id(agent_id)
            .and_then(|id| self.runners.get(id))
            .cloned()
    }

    /// Registered agent ids in sorted order.
    pub fn agent_ids(&self) -> Vec<String> {
        self.runners.keys().cloned().collect()
    }

    pub fn default_agent(&self) -> Option<&str> {
        self.default_agent.as_deref()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agent_ids())
            .field("default_agent", &self.default_agent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_config::TetherConfig;

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry.register(CommandFactory::new("bash", AgentCommand::new("bash")));
        registry.register(CommandFactory::new("claude", AgentCommand::new("claude")));
        registry
    }

    #[test]
    fn test_explicit_id_wins() {
        let registry = registry().with_default("bash");
        let runner = registry.get_runner(Some("claude")).unwrap();
        assert_eq!(runner.agent_id(), "claude");
    }

    #[test]
    fn test_missing_or_unknown_id_uses_default() {
        let registry = registry().with_default("bash");
        assert_eq!(registry.get_runner(None).unwrap().agent_id(), "bash");
        assert_eq!(registry.get_runner(Some("nope")).unwrap().agent_id(), "bash");
        assert_eq!(registry.get_runner(Some("  ")).unwrap().agent_id(), "bash");
    }

    #[test]
    fn test_no_default_with_several_runners() {
        let registry = registry();
        assert!(registry.get_runner(None).is_none());
        assert_eq!(registry.agent_ids(), vec!["bash", "claude"]);
    }

    #[test]
    fn test_single_runner_is_implicit_default() {
        let mut registry = AgentRegistry::new();
        registry.register(CommandFactory::new("only", AgentCommand::new("cat")));
        assert_eq!(registry.get_runner(None).unwrap().agent_id(), "only");
        assert_eq!(registry.resolve_id(Some("other")), Some("only"));
    }

    #[test]
    fn test_empty_registry() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get_runner(Some("x")).is_none());
    }

    #[test]
    fn test_from_config() {
        let config = TetherConfig::from_toml(
            r#"
[agents]
default = "shell"

[agents.shell]
command = "bash"
args = ["-i"]

[agents.echo]
command = "cat"
"#,
        )
        .unwrap();

        let registry = AgentRegistry::from_config(&config.agents);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.default_agent(), Some("shell"));
        assert_eq!(registry.get_runner(None).unwrap().agent_id(), "shell");
    }
}
