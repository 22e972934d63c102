//! Session id helpers.

use uuid::Uuid;

/// Longest session id accepted from a client; longer ids are truncated.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Strip every character that is not ASCII alphanumeric, `-` or `_`.
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_session_id(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_SESSION_ID_LEN)
        .collect();

    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Generate a short server-side session id.
pub fn generate_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// Use the client-supplied id when it survives sanitizing, otherwise generate one.
pub fn resolve_session_id(requested: Option<&str>) -> String {
    requested
        .and_then(sanitize_session_id)
        .unwrap_or_else(generate_session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_allowed_characters() {
        assert_eq!(sanitize_session_id("abc-123_X").as_deref(), Some("abc-123_X"));
    }

    #[test]
    fn test_sanitize_strips_everything_else() {
        assert_eq!(
            sanitize_session_id("../etc/pa ss;wd").as_deref(),
            Some("etcpasswd")
        );
        assert_eq!(sanitize_session_id("héllo").as_deref(), Some("hllo"));
    }

    #[test]
    fn test_sanitize_empty_result() {
        assert!(sanitize_session_id("").is_none());
        assert!(sanitize_session_id("!!!/ ").is_none());
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(200);
        assert_eq!(sanitize_session_id(&long).unwrap().len(), MAX_SESSION_ID_LEN);
    }

    #[test]
    fn test_generated_ids_are_short_and_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
        assert_eq!(sanitize_session_id(&a).as_deref(), Some(a.as_str()));
    }

    #[test]
    fn test_resolve_session_id() {
        assert_eq!(resolve_session_id(Some("abc")), "abc");
        assert_eq!(resolve_session_id(Some("***")).len(), 12);
        assert_eq!(resolve_session_id(None).len(), 12);
    }
}
