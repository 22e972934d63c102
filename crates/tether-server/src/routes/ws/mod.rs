//! WebSocket session gateway.
//!
//! Each stream hosts at most one agent session at a time. The client drives
//! it with `control` (START/STOP), `text`, `script` and `media` frames; the
//! server answers with `event`, `output` and `error` frames.
//!
//! ## Module Structure
//!
//! - `protocol` - Message types (ClientMessage, ServerMessage)
//! - `connection` - Stream lifecycle, the single writer and teardown
//! - `handlers` - Per-message processing
//! - `ansi` - Terminal escape stripping for agent output

mod ansi;
mod connection;
mod handlers;
mod protocol;

use std::net::SocketAddr;

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use tether_types::{LogLevel, LogRecord};

use crate::auth::authorize;
use crate::error::ServerError;
use crate::guard::peer_key;
use crate::state::AppState;

pub use ansi::strip_ansi;
pub use connection::StreamId;
pub use handlers::{INPUT_QUEUE_FULL, NO_ACTIVE_SESSION, NOT_RUNNING};
pub use protocol::{
    ClientMessage, ClientPayload, ControlAction, EventKind, Priority, ServerMessage,
    ServerPayload, salvage_correlation_id,
};

/// Component name used in guard decisions and log records.
pub(super) const COMPONENT: &str = "gateway";

/// GET /ws - WebSocket upgrade handler.
///
/// The peer is authenticated and admitted by the connection guard before
/// the upgrade is accepted; a refused peer gets a plain HTTP error.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = authorize(&headers, Some(addr), state.config.api_key.as_deref()) {
        state.log.write(
            LogRecord::new(
                LogLevel::Warning,
                "auth_failed",
                format!("Rejected stream from {}: {}", addr, e),
                COMPONENT,
            )
            .with_details(serde_json::json!({ "peer": addr.to_string() })),
        );
        return e.into_response();
    }

    let peer = peer_key(&addr);
    if let Err(denial) = state.guard.try_open_connection(&peer, COMPONENT) {
        return ServerError::ConnectionDenied(denial).into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            state.guard.close_connection(&peer, COMPONENT);
            return rejection.into_response();
        }
    };

    let max_size = state.config.max_message_size;
    let guard = state.guard.clone();
    let failed_peer = peer.clone();

    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_failed_upgrade(move |e| {
            tracing::debug!(peer = %failed_peer, error = %e, "WebSocket upgrade failed");
            guard.close_connection(&failed_peer, COMPONENT);
        })
        .on_upgrade(move |socket| connection::handle_socket(socket, state, peer))
}
