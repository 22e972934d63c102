//! Per-peer sliding-window state and address normalization.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Block length used when the configured cooldown overflows the clock.
const MAX_BLOCK: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Reduce a transport address to the bare host used as the peer key.
///
/// Accepts `ipv4:host:port`, `ipv6:[host]:port`, `host:port`, `[v6]:port` and
/// bare hosts, so every port a host connects from maps to one peer.
pub fn normalize_peer(raw: &str) -> String {
    let mut s = raw.trim();
    for prefix in ["ipv4:", "ipv6:", "IPv4:", "IPv6:"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest;
            break;
        }
    }

    if let Ok(addr) = s.parse::<SocketAddr>() {
        return addr.ip().to_canonical().to_string();
    }
    if let Ok(ip) = s.parse::<IpAddr>() {
        return ip.to_canonical().to_string();
    }

    let host = if let Some(rest) = s.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else if s.matches(':').count() == 1 {
        s.split(':').next().unwrap_or(s)
    } else {
        s
    };

    if host.is_empty() {
        "unknown".to_string()
    } else {
        host.to_ascii_lowercase()
    }
}

/// Peer key for a socket address.
pub fn peer_key(addr: &SocketAddr) -> String {
    addr.ip().to_canonical().to_string()
}

/// Mutable state for one peer, always accessed under that peer's lock.
#[derive(Debug)]
pub(crate) struct PeerState {
    pub active_connections: u32,
    pub connection_attempts: VecDeque<Instant>,
    pub messages: VecDeque<Instant>,
    pub violation_count: u32,
    pub blocked_until: Option<Instant>,
    pub last_seen: DateTime<Utc>,
}

impl PeerState {
    pub fn new() -> Self {
        Self {
            active_connections: 0,
            connection_attempts: VecDeque::new(),
            messages: VecDeque::new(),
            violation_count: 0,
            blocked_until: None,
            last_seen: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Whether a block is in force. An expired block is cleared.
    pub fn is_blocked(&mut self, now: Instant) -> bool {
        match self.blocked_until {
            Some(until) if until > now => true,
            Some(_) => {
                self.blocked_until = None;
                false
            }
            None => false,
        }
    }

    /// Count a violation. Returns true when this one triggered a block.
    pub fn register_violation(
        &mut self,
        now: Instant,
        threshold: u32,
        cooldown: Duration,
    ) -> bool {
        self.violation_count += 1;
        if self.violation_count >= threshold {
            self.blocked_until = Some(
                now.checked_add(cooldown)
                    .unwrap_or_else(|| now + MAX_BLOCK),
            );
            self.violation_count = 0;
            true
        } else {
            false
        }
    }
}

/// Drop timestamps that fell out of `window`.
pub(crate) fn prune(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
    while let Some(front) = window.front() {
        if now.saturating_duration_since(*front) >= length {
            window.pop_front();
        } else {
            break;
        }
    }
}
