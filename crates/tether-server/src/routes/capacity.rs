//! Capacity endpoint.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use tether_session::CapacityStatus;

use crate::state::AppState;

/// Query parameters for the capacity endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CapacityQuery {
    /// Include the limit and usage of this agent.
    pub agent_id: Option<String>,
}

/// GET /api/v1/capacity - Server-wide and per-agent session capacity.
pub async fn capacity_handler(
    State(state): State<AppState>,
    Query(query): Query<CapacityQuery>,
) -> Json<CapacityStatus> {
    let agent_id = query.agent_id.as_deref().filter(|id| !id.is_empty());
    Json(state.admission.get_status(agent_id))
}
