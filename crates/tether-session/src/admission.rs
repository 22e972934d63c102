//! The admission controller.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use tether_types::SharedSessionHandle;

use crate::config::AdmissionConfig;
use crate::error::{AdmissionError, Result};

/// A session currently holding capacity.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub agent_id: String,
    pub session_id: String,
    pub registered_at: DateTime<Utc>,
    /// Whether a process handle is attached yet.
    pub running: bool,
}

/// A session whose controlling stream ended without a STOP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbandonedSession {
    pub session_id: String,
    pub agent_id: String,
    pub reason: String,
    pub abandoned_at: DateTime<Utc>,
}

/// Server-wide capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerCapacity {
    pub limit: usize,
    pub active: usize,
    pub remaining: usize,
}

/// Capacity for a single agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentCapacity {
    pub agent_id: String,
    pub limit: usize,
    pub active: usize,
    pub remaining: usize,
}

/// Point-in-time capacity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityStatus {
    pub server: ServerCapacity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentCapacity>,
}

/// Outcome of a successful termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminatedSession {
    pub session_id: String,
    pub agent_id: String,
    /// False when only an abandoned record was cleared.
    pub was_active: bool,
}

struct ActiveSession {
    handle: Option<SharedSessionHandle>,
    registered_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    /// agent id -> session id -> session. Agents with no sessions are removed.
    active: HashMap<String, HashMap<String, ActiveSession>>,
    abandoned: HashMap<String, AbandonedSession>,
}

impl State {
    fn total(&self) -> usize {
        self.active.values().map(HashMap::len).sum()
    }

    fn agent_of(&self, session_id: &str) -> Option<&str> {
        self.active
            .iter()
            .find(|(_, sessions)| sessions.contains_key(session_id))
            .map(|(agent, _)| agent.as_str())
    }

    fn agent_active(&self, agent_id: &str) -> usize {
        self.active.get(agent_id).map(HashMap::len).unwrap_or(0)
    }
}

/// Bounds concurrently running sessions server-wide and per agent.
///
/// All counters live behind one lock. Session handles are stopped outside it.
pub struct AdmissionController {
    config: AdmissionConfig,
    state: Mutex<State>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Reserve capacity for `session_id` under `agent_id`.
    ///
    /// The handle may be attached later with [`attach_handle`](Self::attach_handle)
    /// once the process has been spawned.
    pub fn try_register_session(
        &self,
        agent_id: &str,
        session_id: &str,
        handle: Option<SharedSessionHandle>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if state.agent_of(session_id).is_some() {
            return Err(AdmissionError::AlreadyActive(session_id.to_string()));
        }

        let total = state.total();
        if total >= self.config.max_sessions {
            tracing::info!(
                agent_id,
                session_id,
                active = total,
                limit = self.config.max_sessions,
                "Server session limit reached"
            );
            return Err(AdmissionError::ServerLimit(self.config.max_sessions));
        }

        let limit = self.config.limit_for(agent_id);
        let agent_active = state.agent_active(agent_id);
        if agent_active >= limit {
            tracing::info!(
                agent_id,
                session_id,
                active = agent_active,
                limit,
                "Agent session limit reached"
            );
            return Err(AdmissionError::AgentLimit {
                agent_id: agent_id.to_string(),
                limit,
            });
        }

        state.active.entry(agent_id.to_string()).or_default().insert(
            session_id.to_string(),
            ActiveSession {
                handle,
                registered_at: Utc::now(),
            },
        );
        state.abandoned.remove(session_id);

        tracing::debug!(agent_id, session_id, active = total + 1, "Session registered");
        Ok(())
    }

    /// Attach the process handle to an already registered session.
    ///
    /// Returns false when the session is not registered.
    pub fn attach_handle(
        &self,
        agent_id: &str,
        session_id: &str,
        handle: SharedSessionHandle,
    ) -> bool {
        let mut state = self.state.lock();
        match state
            .active
            .get_mut(agent_id)
            .and_then(|sessions| sessions.get_mut(session_id))
        {
            Some(session) => {
                session.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Release the capacity held by a session. Returns false when absent.
    pub fn unregister_session(&self, agent_id: &str, session_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(sessions) = state.active.get_mut(agent_id) else {
            return false;
        };
        let removed = sessions.remove(session_id).is_some();
        if sessions.is_empty() {
            state.active.remove(agent_id);
        }
        if removed {
            tracing::debug!(agent_id, session_id, "Session unregistered");
        }
        removed
    }

    /// Read-only capacity snapshot, optionally including one agent.
    pub fn get_status(&self, agent_id: Option<&str>) -> CapacityStatus {
        let state = self.state.lock();
        let active = state.total();
        let server = ServerCapacity {
            limit: self.config.max_sessions,
            active,
            remaining: self.config.max_sessions.saturating_sub(active),
        };
        let agent = agent_id.map(|id| {
            let limit = self.config.limit_for(id);
            let active = state.agent_active(id);
            AgentCapacity {
                agent_id: id.to_string(),
                limit,
                active,
                remaining: limit.saturating_sub(active),
            }
        });
        CapacityStatus { server, agent }
    }

    /// Stop, dispose and unregister a session wherever it is registered.
    ///
    /// Also clears its abandoned record. A session that is only recorded as
    /// abandoned has that record cleared and reports `was_active = false`.
    pub fn try_terminate_session(&self, session_id: &str) -> Result<TerminatedSession> {
        let (agent_id, handle) = {
            let mut state = self.state.lock();
            let abandoned = state.abandoned.remove(session_id);

            let Some(agent_id) = state.agent_of(session_id).map(str::to_string) else {
                return match abandoned {
                    Some(record) => Ok(TerminatedSession {
                        session_id: session_id.to_string(),
                        agent_id: record.agent_id,
                        was_active: false,
                    }),
                    None => Err(AdmissionError::NotFound(session_id.to_string())),
                };
            };

            let mut handle = None;
            if let Some(sessions) = state.active.get_mut(&agent_id) {
                handle = sessions.remove(session_id).and_then(|s| s.handle);
                if sessions.is_empty() {
                    state.active.remove(&agent_id);
                }
            }
            (agent_id, handle)
        };

        if let Some(handle) = handle {
            handle.stop();
            handle.dispose();
        }

        tracing::info!(agent_id = %agent_id, session_id, "Session terminated");
        Ok(TerminatedSession {
            session_id: session_id.to_string(),
            agent_id,
            was_active: true,
        })
    }

    /// Record that a session's stream ended without a STOP.
    pub fn mark_session_abandoned(&self, agent_id: &str, session_id: &str, reason: &str) {
        let record = AbandonedSession {
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            reason: reason.to_string(),
            abandoned_at: Utc::now(),
        };
        self.state
            .lock()
            .abandoned
            .insert(session_id.to_string(), record);
        tracing::warn!(agent_id, session_id, reason, "Session abandoned");
    }

    /// Abandoned sessions, oldest first.
    pub fn list_abandoned_sessions(&self) -> Vec<AbandonedSession> {
        let mut records: Vec<_> = self.state.lock().abandoned.values().cloned().collect();
        records.sort_by(|a, b| {
            a.abandoned_at
                .cmp(&b.abandoned_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        records
    }

    /// Sessions currently holding capacity, sorted by agent then session id.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let state = self.state.lock();
        let mut sessions: Vec<_> = state
            .active
            .iter()
            .flat_map(|(agent_id, sessions)| {
                sessions.iter().map(move |(session_id, s)| SessionInfo {
                    agent_id: agent_id.clone(),
                    session_id: session_id.clone(),
                    registered_at: s.registered_at,
                    running: s.handle.is_some(),
                })
            })
            .collect();
        sessions.sort_by(|a, b| {
            a.agent_id
                .cmp(&b.agent_id)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    /// Total sessions holding capacity.
    pub fn active_count(&self) -> usize {
        self.state.lock().total()
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_types::SessionHandle;

    #[derive(Default)]
    struct CountingHandle {
        stops: AtomicUsize,
        disposes: AtomicUsize,
    }

    impl SessionHandle for CountingHandle {
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn dispose(&self) {
            self.disposes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(max: usize) -> AdmissionController {
        AdmissionController::new(AdmissionConfig::new().with_max_sessions(max))
    }

    #[test]
    fn test_server_limit() {
        let admission = controller(1);
        admission.try_register_session("a", "s1", None).unwrap();

        let err = admission.try_register_session("a", "s2", None).unwrap_err();
        assert_eq!(err.to_string(), "Server session limit reached (1)");
        let err = admission.try_register_session("b", "s2", None).unwrap_err();
        assert_eq!(err, AdmissionError::ServerLimit(1));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_agent_limit_is_per_agent() {
        let admission =
            AdmissionController::new(AdmissionConfig::new().with_max_sessions(5).with_agent_limit("a", 1));

        admission.try_register_session("a", "s1", None).unwrap();
        let err = admission.try_register_session("a", "s2", None).unwrap_err();
        assert_eq!(err.to_string(), "Agent 'a' session limit reached (1)");

        admission.try_register_session("b", "s3", None).unwrap();
        assert_eq!(admission.active_count(), 2);
    }

    #[test]
    fn test_same_session_id_under_other_agent() {
        let admission =
            AdmissionController::new(AdmissionConfig::new().with_max_sessions(5).with_agent_limit("a", 1));
        admission.try_register_session("a", "s1", None).unwrap();
        assert!(admission.try_register_session("a", "s2", None).is_err());
        // agent b is unaffected by a's ceiling
        admission.try_register_session("b", "s2", None).unwrap();
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let admission = controller(5);
        admission.try_register_session("a", "s1", None).unwrap();
        let err = admission.try_register_session("b", "s1", None).unwrap_err();
        assert_eq!(err, AdmissionError::AlreadyActive("s1".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_reregister_after_unregister() {
        let admission = controller(1);
        admission.try_register_session("a", "abc", None).unwrap();
        assert!(admission.unregister_session("a", "abc"));
        admission.try_register_session("a", "abc", None).unwrap();
    }

    #[test]
    fn test_unregister_drops_empty_agent() {
        let admission = controller(5);
        admission.try_register_session("a", "s1", None).unwrap();
        admission.try_register_session("a", "s2", None).unwrap();

        assert!(admission.unregister_session("a", "s1"));
        assert_eq!(admission.state.lock().active.len(), 1);
        assert!(admission.unregister_session("a", "s2"));
        assert!(admission.state.lock().active.is_empty());
        assert!(!admission.unregister_session("a", "s2"));
    }

    #[test]
    fn test_total_matches_per_agent_sum() {
        let admission = controller(10);
        for (agent, session) in [("a", "1"), ("a", "2"), ("b", "3"), ("c", "4")] {
            admission.try_register_session(agent, session, None).unwrap();
        }
        admission.unregister_session("a", "1");

        let status = admission.get_status(None);
        let per_agent: usize = ["a", "b", "c"]
            .iter()
            .map(|a| admission.get_status(Some(a)).agent.unwrap().active)
            .sum();
        assert_eq!(status.server.active, per_agent);
        assert_eq!(status.server.remaining, 7);
    }

    #[test]
    fn test_status_is_read_only() {
        let admission =
            AdmissionController::new(AdmissionConfig::new().with_max_sessions(4).with_agent_limit("a", 2));
        admission.try_register_session("a", "s1", None).unwrap();

        let status = admission.get_status(Some("a"));
        assert_eq!(status.server, ServerCapacity { limit: 4, active: 1, remaining: 3 });
        let agent = status.agent.unwrap();
        assert_eq!((agent.limit, agent.active, agent.remaining), (2, 1, 1));

        // unknown agents are not created by a status query
        let status = admission.get_status(Some("ghost"));
        assert_eq!(status.agent.unwrap().limit, 4);
        assert_eq!(admission.state.lock().active.len(), 1);
    }

    #[test]
    fn test_terminate_stops_and_disposes_handle() {
        let admission = controller(5);
        let handle = Arc::new(CountingHandle::default());
        admission.try_register_session("a", "s1", None).unwrap();
        assert!(admission.attach_handle("a", "s1", handle.clone()));

        let terminated = admission.try_terminate_session("s1").unwrap();
        assert_eq!(terminated.agent_id, "a");
        assert!(terminated.was_active);
        assert_eq!(handle.stops.load(Ordering::SeqCst), 1);
        assert_eq!(handle.disposes.load(Ordering::SeqCst), 1);
        assert_eq!(admission.active_count(), 0);

        assert_eq!(
            admission.try_terminate_session("s1").unwrap_err(),
            AdmissionError::NotFound("s1".to_string())
        );
    }

    #[test]
    fn test_attach_handle_to_unknown_session() {
        let admission = controller(5);
        assert!(!admission.attach_handle("a", "nope", Arc::new(CountingHandle::default())));
    }

    #[test]
    fn test_abandoned_cleared_by_register() {
        let admission = controller(5);
        admission.mark_session_abandoned("a", "s1", "stream closed");
        assert_eq!(admission.list_abandoned_sessions().len(), 1);

        admission.try_register_session("a", "s1", None).unwrap();
        assert!(admission.list_abandoned_sessions().is_empty());
    }

    #[test]
    fn test_abandoned_cleared_by_terminate() {
        let admission = controller(5);
        admission.mark_session_abandoned("a", "s1", "stream closed");

        let terminated = admission.try_terminate_session("s1").unwrap();
        assert!(!terminated.was_active);
        assert!(admission.list_abandoned_sessions().is_empty());
    }

    #[test]
    fn test_list_sessions_snapshot() {
        let admission = controller(5);
        admission.try_register_session("b", "s2", None).unwrap();
        admission
            .try_register_session("a", "s1", Some(Arc::new(CountingHandle::default())))
            .unwrap();

        let sessions = admission.list_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].agent_id, "a");
        assert!(sessions[0].running);
        assert!(!sessions[1].running);

        let json = serde_json::to_value(&sessions[0]).unwrap();
        assert_eq!(json["session_id"], "s1");
    }
}
