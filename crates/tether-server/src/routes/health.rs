//! Liveness check for load balancers and `tether status`.
//!
//! Unauthenticated, so it reports counts only: no peer addresses, session ids
//! or agent names.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `draining` once shutdown has begun.
    pub status: String,
    pub version: String,
    /// Registered sessions across all agents.
    pub active_sessions: usize,
    /// Peers holding at least one open stream.
    pub connected_peers: usize,
    /// Agents a START can resolve to.
    pub agents: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_cancelled() {
        "draining"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: state.admission.active_count(),
        connected_peers: state.guard.get_connected_peers().len(),
        agents: state.agents.len(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tether_agent::{AgentCommand, AgentRegistry, CommandFactory};
    use tower::ServiceExt;

    use crate::ServerConfig;

    fn state() -> AppState {
        let mut agents = AgentRegistry::new();
        agents.register(CommandFactory::new("echo", AgentCommand::new("cat")));
        AppState::new(ServerConfig::new(None), agents)
    }

    async fn get_health(state: AppState) -> HealthResponse {
        let response = health_routes()
            .with_state(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = state();
        state
            .admission
            .try_register_session("echo", "s-1", None)
            .unwrap();

        let health = get_health(state).await;
        assert_eq!(health.status, "ok");
        assert!(!health.version.is_empty());
        assert_eq!(health.active_sessions, 1);
        assert_eq!(health.connected_peers, 0);
        assert_eq!(health.agents, 1);
    }

    #[tokio::test]
    async fn test_health_reports_draining() {
        let state = state();
        state.shutdown.cancel();

        let health = get_health(state).await;
        assert_eq!(health.status, "draining");
    }
}
