//! API-key / loopback authentication.
//!
//! With an API key configured, the `x-api-key` header must match it exactly.
//! Without one, only loopback peers are accepted. The same check guards the
//! WebSocket upgrade and the management API.
//!
//! # Security
//!
//! Key comparison uses constant-time comparison to prevent timing attacks.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::error::ErrorResponse;
use crate::state::AppState;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

// ─────────────────────────────────────────────────────────────────────────────
// Auth Error
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// A key is configured but the header is absent.
    #[error("Missing API key")]
    MissingKey,
    /// The header does not match the configured key.
    #[error("Invalid API key")]
    InvalidKey,
    /// No key is configured and the peer is not loopback.
    #[error("Only loopback connections are allowed without an API key")]
    NotLoopback,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            AuthError::MissingKey | AuthError::InvalidKey => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            AuthError::NotLoopback => (StatusCode::FORBIDDEN, "forbidden"),
        };

        let body = ErrorResponse {
            code: code.to_string(),
            message: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Security Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Compare two byte strings in constant time.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() == b.len() {
        a.ct_eq(b).into()
    } else {
        // keep the timing of a full comparison
        let _ = a.ct_eq(a);
        false
    }
}

/// Check a request's headers and peer against the configured key.
///
/// `peer` is `None` when the transport did not report an address; such
/// requests are only accepted with a valid key.
pub fn authorize(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    api_key: Option<&str>,
) -> Result<(), AuthError> {
    match api_key {
        Some(expected) => {
            let provided = headers
                .get(API_KEY_HEADER)
                .ok_or(AuthError::MissingKey)?;
            if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
                Ok(())
            } else {
                Err(AuthError::InvalidKey)
            }
        }
        None => match peer {
            Some(addr) if addr.ip().to_canonical().is_loopback() => Ok(()),
            _ => Err(AuthError::NotLoopback),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication middleware for the management API.
pub async fn auth_middleware(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if let Err(e) = authorize(
        request.headers(),
        Some(peer),
        state.config.api_key.as_deref(),
    ) {
        tracing::warn!(
            path = %request.uri().path(),
            peer = %peer,
            error = %e,
            "Rejected unauthenticated request"
        );
        return Err(e);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(key: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            headers.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        }
        headers
    }

    fn addr(s: &str) -> Option<SocketAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-longer"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_key_must_match() {
        let key = Some("k3y");
        assert_eq!(authorize(&headers(Some("k3y")), addr("10.0.0.1:1"), key), Ok(()));
        assert_eq!(
            authorize(&headers(Some("nope")), addr("127.0.0.1:1"), key),
            Err(AuthError::InvalidKey)
        );
        assert_eq!(
            authorize(&headers(None), addr("127.0.0.1:1"), key),
            Err(AuthError::MissingKey)
        );
    }

    #[test]
    fn test_non_ascii_key_matches_bytewise() {
        let key = "clé-secrète";
        let mut headers = HeaderMap::new();
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_bytes(key.as_bytes()).unwrap(),
        );
        assert_eq!(authorize(&headers, addr("10.0.0.1:1"), Some(key)), Ok(()));
        assert_eq!(
            authorize(&headers, addr("10.0.0.1:1"), Some("cle-secrete")),
            Err(AuthError::InvalidKey)
        );
    }

    #[test]
    fn test_no_key_requires_loopback() {
        assert_eq!(authorize(&headers(None), addr("127.0.0.1:5"), None), Ok(()));
        assert_eq!(authorize(&headers(None), addr("[::1]:5"), None), Ok(()));
        assert_eq!(
            authorize(&headers(None), addr("[::ffff:127.0.0.1]:5"), None),
            Ok(())
        );
        assert_eq!(
            authorize(&headers(Some("anything")), addr("192.168.0.2:5"), None),
            Err(AuthError::NotLoopback)
        );
        assert_eq!(authorize(&headers(None), None, None), Err(AuthError::NotLoopback));
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            AuthError::MissingKey.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::NotLoopback.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }
}
