//! WebSocket session gateway and management API for tether.
//!
//! This crate exposes agent processes to remote clients. Each WebSocket
//! stream can run one agent session at a time; a small REST API lets an
//! operator inspect and terminate sessions and manage peers.
//!
//! # Features
//!
//! - WebSocket gateway with correlation-id request/reply tagging
//! - Per-peer connection and message rate limits with bans
//! - Server-wide and per-agent session ceilings
//! - API-key authentication, loopback-only when no key is set
//! - Rate limiting and request logging for the management API
//!
//! # Example
//!
//! ```ignore
//! use tether_agent::AgentRegistry;
//! use tether_server::{Server, ServerConfig};
//!
//! let config = ServerConfig::new(Some("secret".to_string()))
//!     .with_bind_address("127.0.0.1:7420".parse()?);
//!
//! let server = Server::new(config, AgentRegistry::from_config(&agents));
//! server.run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod guard;
pub mod media;
pub mod ratelimit;
pub mod routes;
pub mod script;
pub mod state;

pub use auth::{API_KEY_HEADER, AuthError, auth_middleware, authorize};
pub use config::ServerConfig;
pub use error::{ErrorResponse, Result, ServerError};
pub use guard::{BanEntry, ConnectionGuard, Denial, GuardConfig, HistoryEntry, PeerSnapshot};
pub use media::{MediaError, MediaStore, SavedMedia};
pub use ratelimit::{rate_limit_middleware, request_logging_middleware};
pub use routes::{ClientMessage, ServerMessage};
pub use script::{ScriptError, ScriptOutcome, ScriptRunner, ScriptType};
pub use state::AppState;

use std::net::SocketAddr;

use axum::{Router, middleware};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use tether_agent::AgentRegistry;

/// The tether HTTP/WebSocket server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server with the given configuration and agents.
    pub fn new(config: ServerConfig, agents: AgentRegistry) -> Self {
        Self {
            state: AppState::new(config, agents),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Shared state, for embedding applications and tests.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Token that stops the server and every open stream when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        Router::new()
            // Health routes (no auth required)
            .merge(routes::health_routes())
            // WebSocket (auth and guard checks run before the upgrade)
            .route("/ws", get(routes::ws_handler))
            .nest("/api/v1", self.api_routes())
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                ratelimit::request_logging_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Management API routes (v1).
    ///
    /// Every route requires authentication and shares one rate limiter.
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{delete, get, post};

        Router::new()
            // Session endpoints
            .route("/sessions", get(routes::list_sessions_handler))
            .route("/sessions/abandoned", get(routes::list_abandoned_handler))
            .route(
                "/sessions/{id}",
                delete(routes::terminate_session_handler),
            )
            .route("/capacity", get(routes::capacity_handler))
            // Peer endpoints
            .route("/peers", get(routes::list_peers_handler))
            .route("/peers/banned", get(routes::list_bans_handler))
            .route("/peers/history", get(routes::history_handler))
            .route(
                "/peers/{peer}/ban",
                post(routes::ban_peer_handler).delete(routes::unban_peer_handler),
            )
            // Rate limiting (inner layer, runs after auth)
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                ratelimit::rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ))
    }

    /// Run the server on the configured bind address.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the shutdown token fires.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let router = self.router();
        let shutdown = self.state.shutdown.clone();

        if let Ok(addr) = listener.local_addr() {
            info!("Starting server on {}", addr);
        }

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
