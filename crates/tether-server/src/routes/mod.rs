//! API routes.

pub mod capacity;
pub mod health;
pub mod peers;
pub mod sessions;
pub mod ws;

pub use capacity::{CapacityQuery, capacity_handler};
pub use health::{HealthResponse, health_routes};
pub use peers::{
    BanRequest, HistoryResponse, ListBansResponse, ListPeersResponse, ban_peer_handler,
    history_handler, list_bans_handler, list_peers_handler, unban_peer_handler,
};
pub use sessions::{
    ListAbandonedResponse, ListSessionsResponse, list_abandoned_handler, list_sessions_handler,
    terminate_session_handler,
};
pub use ws::{ClientMessage, ServerMessage, ws_handler};
