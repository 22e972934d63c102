//! Connection guard: per-peer rate limiting, DoS cooldown and ban list.
//!
//! Every WebSocket upgrade goes through [`ConnectionGuard::try_open_connection`]
//! and every inbound frame through
//! [`ConnectionGuard::try_register_client_message`]. Peer state is sharded in a
//! `DashMap` with one mutex per peer, so the message hot path only contends
//! with other traffic from the same host. The ban list and the history ring
//! have their own locks.

mod history;
mod peer;

pub use history::{GuardAction, HistoryEntry};
pub use peer::{normalize_peer, peer_key};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use tether_config::GuardSection;
use tether_types::{LogLevel, LogRecord, SharedLogSink, TracingLogSink};

use history::History;
use peer::{PeerState, prune};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Guard thresholds.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// When false only the ban list is enforced.
    pub enabled: bool,
    pub connection_window: Duration,
    pub max_connection_attempts_per_window: u32,
    pub max_connections_per_peer: u32,
    pub message_window: Duration,
    pub max_messages_per_window: u32,
    /// Violations before a peer is blocked for `block_cooldown`.
    pub violation_threshold: u32,
    pub block_cooldown: Duration,
    pub max_history_entries: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::from(&GuardSection::default())
    }
}

impl From<&GuardSection> for GuardConfig {
    fn from(section: &GuardSection) -> Self {
        Self {
            enabled: section.enabled,
            connection_window: Duration::from_secs(section.connection_window_secs),
            max_connection_attempts_per_window: section.max_connection_attempts_per_window,
            max_connections_per_peer: section.max_connections_per_peer,
            message_window: Duration::from_millis(section.message_window_ms),
            max_messages_per_window: section.max_messages_per_window,
            violation_threshold: section.violation_threshold,
            block_cooldown: Duration::from_secs(section.block_cooldown_secs),
            max_history_entries: section.max_history_entries,
        }
    }
}

impl GuardConfig {
    /// Set the message window and its ceiling.
    pub fn with_message_rate(mut self, max: u32, window: Duration) -> Self {
        self.max_messages_per_window = max;
        self.message_window = window;
        self
    }

    /// Set the connection-attempt window and its ceiling.
    pub fn with_connection_rate(mut self, max: u32, window: Duration) -> Self {
        self.max_connection_attempts_per_window = max;
        self.connection_window = window;
        self
    }

    pub fn with_max_connections_per_peer(mut self, max: u32) -> Self {
        self.max_connections_per_peer = max;
        self
    }

    pub fn with_violation_threshold(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.violation_threshold = threshold;
        self.block_cooldown = cooldown;
        self
    }

    pub fn with_max_history_entries(mut self, max: usize) -> Self {
        self.max_history_entries = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decisions and snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Why the guard refused a connection or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("Peer is banned")]
    Banned,
    #[error("Peer is temporarily blocked")]
    Blocked,
    #[error("Too many connection attempts.")]
    TooManyAttempts,
    #[error("Too many active connections.")]
    TooManyConnections,
    #[error("Too many messages.")]
    TooManyMessages,
}

impl Denial {
    /// Bans are terminal; everything else clears with time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Denial::Banned)
    }
}

/// A banned peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub peer: String,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
}

/// Point-in-time view of one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub peer: String,
    pub active_connections: u32,
    pub connection_attempts_in_window: usize,
    pub messages_in_window: usize,
    pub violation_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    pub banned: bool,
    pub last_seen: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Guard
// ─────────────────────────────────────────────────────────────────────────────

const COMPONENT: &str = "guard";

/// Per-peer admission gate for connections and messages.
pub struct ConnectionGuard {
    config: GuardConfig,
    peers: DashMap<String, Arc<Mutex<PeerState>>>,
    bans: RwLock<HashMap<String, BanEntry>>,
    history: History,
    log: SharedLogSink,
}

/// Outcome of a check made under a peer lock, reported after the lock is released.
struct Verdict {
    denial: Option<Denial>,
    blocked_now: bool,
}

impl Verdict {
    fn allow() -> Self {
        Self {
            denial: None,
            blocked_now: false,
        }
    }

    fn deny(denial: Denial) -> Self {
        Self {
            denial: Some(denial),
            blocked_now: false,
        }
    }
}

impl ConnectionGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self::with_log_sink(config, TracingLogSink::shared())
    }

    pub fn with_log_sink(config: GuardConfig, log: SharedLogSink) -> Self {
        let history = History::new(config.max_history_entries);
        Self {
            config,
            peers: DashMap::new(),
            bans: RwLock::new(HashMap::new()),
            history,
            log,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    fn peer_state(&self, peer: &str) -> Arc<Mutex<PeerState>> {
        // Clone the Arc so the shard lock is released before the peer lock is taken.
        Arc::clone(
            self.peers
                .entry(peer.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(PeerState::new())))
                .value(),
        )
    }

    /// Gate a new connection from `peer`.
    pub fn try_open_connection(&self, peer: &str, component: &str) -> Result<(), Denial> {
        let peer = normalize_peer(peer);

        if self.is_banned(&peer) {
            return self.finish(&peer, component, GuardAction::Open, Verdict::deny(Denial::Banned));
        }

        let state = self.peer_state(&peer);
        let verdict = {
            let mut state = state.lock();
            state.touch();

            if !self.config.enabled {
                state.active_connections += 1;
                Verdict::allow()
            } else {
                let now = Instant::now();
                prune(
                    &mut state.connection_attempts,
                    now,
                    self.config.connection_window,
                );

                if state.is_blocked(now) {
                    Verdict::deny(Denial::Blocked)
                } else if state.connection_attempts.len()
                    >= self.config.max_connection_attempts_per_window as usize
                {
                    self.violation(&mut state, now, Denial::TooManyAttempts)
                } else if state.active_connections >= self.config.max_connections_per_peer {
                    self.violation(&mut state, now, Denial::TooManyConnections)
                } else {
                    state.connection_attempts.push_back(now);
                    state.active_connections += 1;
                    Verdict::allow()
                }
            }
        };

        self.finish(&peer, component, GuardAction::Open, verdict)
    }

    /// Gate one inbound message from `peer`.
    pub fn check_client_message(&self, peer: &str, component: &str) -> Result<(), Denial> {
        let peer = normalize_peer(peer);

        if self.is_banned(&peer) {
            return self.finish(
                &peer,
                component,
                GuardAction::Message,
                Verdict::deny(Denial::Banned),
            );
        }

        let state = self.peer_state(&peer);
        let verdict = {
            let mut state = state.lock();
            state.touch();

            if !self.config.enabled {
                Verdict::allow()
            } else {
                let now = Instant::now();
                prune(&mut state.messages, now, self.config.message_window);

                if state.is_blocked(now) {
                    Verdict::deny(Denial::Blocked)
                } else if state.messages.len() >= self.config.max_messages_per_window as usize {
                    self.violation(&mut state, now, Denial::TooManyMessages)
                } else {
                    state.messages.push_back(now);
                    Verdict::allow()
                }
            }
        };

        self.finish(&peer, component, GuardAction::Message, verdict)
    }

    /// Boolean form of [`check_client_message`](Self::check_client_message).
    pub fn try_register_client_message(&self, peer: &str, component: &str) -> bool {
        self.check_client_message(peer, component).is_ok()
    }

    /// Record that a connection from `peer` closed.
    pub fn close_connection(&self, peer: &str, component: &str) {
        let peer = normalize_peer(peer);
        if let Some(state) = self.peers.get(&peer).map(|s| Arc::clone(s.value())) {
            let mut state = state.lock();
            state.active_connections = state.active_connections.saturating_sub(1);
            state.touch();
        }
        self.record(&peer, component, GuardAction::Close, true, "connection closed");
    }

    /// Ban `peer`. Replaces an existing ban's reason.
    pub fn ban_peer(&self, peer: &str, reason: &str) -> BanEntry {
        let peer = normalize_peer(peer);
        let entry = BanEntry {
            peer: peer.clone(),
            reason: reason.to_string(),
            banned_at: Utc::now(),
        };
        self.bans.write().insert(peer.clone(), entry.clone());

        self.record(&peer, COMPONENT, GuardAction::Ban, true, reason);
        self.log.write(
            LogRecord::new(
                LogLevel::Warning,
                "peer_banned",
                format!("Peer {} banned: {}", peer, reason),
                COMPONENT,
            )
            .with_details(serde_json::json!({ "peer": peer })),
        );
        entry
    }

    /// Lift a ban. Returns false when `peer` was not banned.
    pub fn unban_peer(&self, peer: &str) -> bool {
        let peer = normalize_peer(peer);
        let removed = self.bans.write().remove(&peer).is_some();

        self.record(
            &peer,
            COMPONENT,
            GuardAction::Unban,
            removed,
            if removed { "ban lifted" } else { "peer was not banned" },
        );
        if removed {
            self.log.write(
                LogRecord::new(
                    LogLevel::Info,
                    "peer_unbanned",
                    format!("Peer {} unbanned", peer),
                    COMPONENT,
                )
                .with_details(serde_json::json!({ "peer": peer })),
            );
        }
        removed
    }

    pub fn is_banned(&self, peer: &str) -> bool {
        self.bans.read().contains_key(&normalize_peer(peer))
    }

    /// Peers with at least one open connection.
    pub fn get_connected_peers(&self) -> Vec<PeerSnapshot> {
        self.snapshot(|s| s.active_connections > 0)
    }

    /// Every peer seen since startup.
    pub fn get_all_peers(&self) -> Vec<PeerSnapshot> {
        self.snapshot(|_| true)
    }

    /// Snapshot of one peer, if it has been seen.
    pub fn get_peer(&self, peer: &str) -> Option<PeerSnapshot> {
        let peer = normalize_peer(peer);
        let state = self.peers.get(&peer).map(|s| Arc::clone(s.value()))?;
        let banned = self.is_banned(&peer);
        let state = state.lock();
        Some(self.describe(&peer, &state, banned))
    }

    /// Banned peers, oldest ban first.
    pub fn get_banned_peers(&self) -> Vec<BanEntry> {
        let mut bans: Vec<_> = self.bans.read().values().cloned().collect();
        bans.sort_by(|a, b| a.banned_at.cmp(&b.banned_at).then_with(|| a.peer.cmp(&b.peer)));
        bans
    }

    /// Newest `limit` history rows (all when `None`), oldest first.
    pub fn get_connection_history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.history.snapshot(limit)
    }

    fn snapshot(&self, filter: impl Fn(&PeerState) -> bool) -> Vec<PeerSnapshot> {
        let peers: Vec<(String, Arc<Mutex<PeerState>>)> = self
            .peers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        let bans = self.bans.read().clone();

        let mut out: Vec<_> = peers
            .into_iter()
            .filter_map(|(peer, state)| {
                let state = state.lock();
                filter(&state).then(|| self.describe(&peer, &state, bans.contains_key(&peer)))
            })
            .collect();
        out.sort_by(|a, b| a.peer.cmp(&b.peer));
        out
    }

    fn describe(&self, peer: &str, state: &PeerState, banned: bool) -> PeerSnapshot {
        let now = Instant::now();
        let in_window = |window: &std::collections::VecDeque<Instant>, length: Duration| {
            window
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < length)
                .count()
        };
        let blocked_until = state
            .blocked_until
            .filter(|until| *until > now)
            .and_then(|until| chrono::Duration::from_std(until - now).ok())
            .map(|remaining| Utc::now() + remaining);

        PeerSnapshot {
            peer: peer.to_string(),
            active_connections: state.active_connections,
            connection_attempts_in_window: in_window(
                &state.connection_attempts,
                self.config.connection_window,
            ),
            messages_in_window: in_window(&state.messages, self.config.message_window),
            violation_count: state.violation_count,
            blocked_until,
            banned,
            last_seen: state.last_seen,
        }
    }

    fn violation(&self, state: &mut PeerState, now: Instant, denial: Denial) -> Verdict {
        let blocked_now = state.register_violation(
            now,
            self.config.violation_threshold,
            self.config.block_cooldown,
        );
        Verdict {
            denial: Some(denial),
            blocked_now,
        }
    }

    fn finish(
        &self,
        peer: &str,
        component: &str,
        action: GuardAction,
        verdict: Verdict,
    ) -> Result<(), Denial> {
        match verdict.denial {
            None => {
                self.record(peer, component, action, true, "allowed");
                Ok(())
            }
            Some(denial) => {
                let detail = denial.to_string();
                self.record(peer, component, action, false, &detail);

                let (level, event_type) = if verdict.blocked_now {
                    (LogLevel::Warning, "peer_blocked")
                } else if denial == Denial::Banned {
                    (LogLevel::Warning, "banned_peer_rejected")
                } else {
                    (LogLevel::Info, "peer_rate_limited")
                };
                let message = if verdict.blocked_now {
                    format!(
                        "{} ({:?}) blocked for {}s after repeated violations",
                        peer,
                        action,
                        self.config.block_cooldown.as_secs()
                    )
                } else {
                    format!("{} ({:?}) denied: {}", peer, action, detail)
                };
                self.log.write(
                    LogRecord::new(level, event_type, message, component)
                        .with_details(serde_json::json!({ "peer": peer, "reason": detail })),
                );
                Err(denial)
            }
        }
    }

    fn record(&self, peer: &str, component: &str, action: GuardAction, allowed: bool, detail: &str) {
        self.history.record(HistoryEntry {
            timestamp: Utc::now(),
            peer: peer.to_string(),
            action,
            allowed,
            component: component.to_string(),
            detail: detail.to_string(),
        });
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("config", &self.config)
            .field("peers", &self.peers.len())
            .field("bans", &self.bans.read().len())
            .field("history", &self.history.len())
            .finish()
    }
}
