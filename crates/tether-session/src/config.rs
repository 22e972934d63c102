//! Configuration for the admission controller.

use std::collections::HashMap;

use tether_config::{AdmissionSection, defaults};

/// Session ceilings.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Server-wide ceiling.
    pub max_sessions: usize,

    /// Per-agent overrides. Values above `max_sessions` are clamped on lookup.
    pub agent_limits: HashMap<String, usize>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_sessions: defaults::MAX_SESSIONS,
            agent_limits: HashMap::new(),
        }
    }
}

impl AdmissionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server-wide ceiling.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set a per-agent ceiling.
    pub fn with_agent_limit(mut self, agent_id: impl Into<String>, limit: usize) -> Self {
        self.agent_limits.insert(agent_id.into(), limit);
        self
    }

    /// Effective ceiling for `agent_id`.
    pub fn limit_for(&self, agent_id: &str) -> usize {
        self.agent_limits
            .get(agent_id)
            .map(|limit| (*limit).min(self.max_sessions))
            .unwrap_or(self.max_sessions)
    }
}

impl From<&AdmissionSection> for AdmissionConfig {
    fn from(section: &AdmissionSection) -> Self {
        Self {
            max_sessions: section.max_sessions,
            agent_limits: section
                .agent_limits
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}
