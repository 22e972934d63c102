//! Peer inspection and ban management endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::guard::{BanEntry, HistoryEntry, PeerSnapshot};
use crate::state::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameters for listing peers.
#[derive(Debug, Default, Deserialize)]
pub struct ListPeersQuery {
    /// Include peers with no open connection.
    #[serde(default)]
    pub all: bool,
}

/// Response for list peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPeersResponse {
    pub peers: Vec<PeerSnapshot>,
    pub total: usize,
}

/// Response for list bans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBansResponse {
    pub bans: Vec<BanEntry>,
    pub total: usize,
}

/// Request body for banning a peer.
#[derive(Debug, Default, Deserialize)]
pub struct BanRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Query parameters for the history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Newest N rows; all retained rows when absent.
    pub limit: Option<usize>,
}

/// Response for connection history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntry>,
    pub total: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/peers - Connected peers, or every known peer with `?all=true`.
pub async fn list_peers_handler(
    State(state): State<AppState>,
    Query(query): Query<ListPeersQuery>,
) -> Json<ListPeersResponse> {
    let peers = if query.all {
        state.guard.get_all_peers()
    } else {
        state.guard.get_connected_peers()
    };
    let total = peers.len();
    Json(ListPeersResponse { peers, total })
}

/// GET /api/v1/peers/banned - Banned peers.
pub async fn list_bans_handler(State(state): State<AppState>) -> Json<ListBansResponse> {
    let bans = state.guard.get_banned_peers();
    let total = bans.len();
    Json(ListBansResponse { bans, total })
}

/// POST /api/v1/peers/{peer}/ban - Ban a peer.
///
/// The body is optional; a missing reason is recorded as "manual ban".
pub async fn ban_peer_handler(
    State(state): State<AppState>,
    Path(peer): Path<String>,
    body: Option<Json<BanRequest>>,
) -> Result<Json<BanEntry>, ServerError> {
    if peer.trim().is_empty() {
        return Err(ServerError::BadRequest("Peer must not be empty".to_string()));
    }

    let reason = body
        .and_then(|Json(req)| req.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "manual ban".to_string());

    Ok(Json(state.guard.ban_peer(&peer, &reason)))
}

/// DELETE /api/v1/peers/{peer}/ban - Lift a ban.
pub async fn unban_peer_handler(
    State(state): State<AppState>,
    Path(peer): Path<String>,
) -> Result<StatusCode, ServerError> {
    if state.guard.unban_peer(&peer) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::NotFound(format!("Peer {} is not banned", peer)))
    }
}

/// GET /api/v1/peers/history - Recent guard decisions, oldest first.
pub async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let entries = state.guard.get_connection_history(query.limit);
    let total = entries.len();
    Json(HistoryResponse { entries, total })
}
