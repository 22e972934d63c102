//! Session management endpoints.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use tether_session::{AbandonedSession, SessionInfo, TerminatedSession};
use tether_types::{LogLevel, LogRecord};

use crate::error::ServerError;
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response for list sessions.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Sessions currently holding capacity.
    pub sessions: Vec<SessionInfo>,
    /// Total count.
    pub total: usize,
}

/// Response for list abandoned sessions.
#[derive(Debug, Clone, Serialize)]
pub struct ListAbandonedResponse {
    pub sessions: Vec<AbandonedSession>,
    pub total: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/sessions - List active sessions.
pub async fn list_sessions_handler(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.admission.list_sessions();
    let total = sessions.len();
    Json(ListSessionsResponse { sessions, total })
}

/// GET /api/v1/sessions/abandoned - Sessions whose stream ended without STOP.
pub async fn list_abandoned_handler(State(state): State<AppState>) -> Json<ListAbandonedResponse> {
    let sessions = state.admission.list_abandoned_sessions();
    let total = sessions.len();
    Json(ListAbandonedResponse { sessions, total })
}

/// DELETE /api/v1/sessions/{id} - Terminate a session.
///
/// Stops the process if one is attached and releases its capacity. Also
/// clears an abandoned record for the id.
pub async fn terminate_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TerminatedSession>, ServerError> {
    let terminated = state.admission.try_terminate_session(&session_id)?;

    state.log.write(
        LogRecord::new(
            LogLevel::Info,
            "session_terminated",
            format!("Session '{}' terminated by operator", session_id),
            "management",
        )
        .with_session(&session_id)
        .with_details(serde_json::json!({
            "agent_id": terminated.agent_id,
            "was_active": terminated.was_active,
        })),
    );

    Ok(Json(terminated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::{delete, get},
    };
    use tether_agent::AgentRegistry;
    use tower::ServiceExt;

    fn create_test_state() -> AppState {
        AppState::new(ServerConfig::new(None), AgentRegistry::new())
    }

    fn create_test_router(state: AppState) -> Router {
        Router::new()
            .route("/sessions", get(list_sessions_handler))
            .route("/sessions/abandoned", get(list_abandoned_handler))
            .route("/sessions/{id}", delete(terminate_session_handler))
            .with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let app = create_test_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total"], 0);
        assert!(json["sessions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_sessions_reports_registered() {
        let state = create_test_state();
        state
            .admission
            .try_register_session("echo", "s-1", None)
            .unwrap();
        let app = create_test_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["sessions"][0]["session_id"], "s-1");
        assert_eq!(json["sessions"][0]["agent_id"], "echo");
        assert_eq!(json["sessions"][0]["running"], false);
    }

    #[tokio::test]
    async fn test_terminate_unknown_session_is_404() {
        let app = create_test_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/sessions/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["code"], "not_found");
    }

    #[tokio::test]
    async fn test_terminate_releases_capacity() {
        let state = create_test_state();
        state
            .admission
            .try_register_session("echo", "s-1", None)
            .unwrap();
        let app = create_test_router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/sessions/s-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["was_active"], true);
        assert_eq!(state.admission.active_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_listed_then_cleared_by_terminate() {
        let state = create_test_state();
        state
            .admission
            .mark_session_abandoned("echo", "gone", "stream closed without STOP");

        let app = create_test_router(state.clone());
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sessions/abandoned")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["sessions"][0]["reason"], "stream closed without STOP");

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/sessions/gone")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["was_active"], false);
        assert!(state.admission.list_abandoned_sessions().is_empty());
    }
}
