//! Bearer token checks for the status API

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use tracing::warn;

/// Whether the request carries the configured token.
///
/// An empty configured token disables auth.
pub fn authorize(configured_token: &str, headers: &HeaderMap) -> bool {
    if configured_token.is_empty() {
        return true;
    }
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token);
    match provided {
        Some(token) => constant_time_eq(configured_token.as_bytes(), token.as_bytes()),
        None => {
            warn!("Status API: request without bearer token");
            false
        }
    }
}

/// Token from an `Authorization: Bearer <token>` value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let token = header_value.trim().strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_no_configured_token_allows_all() {
        assert!(authorize("", &HeaderMap::new()));
    }

    #[test]
    fn test_matching_token() {
        assert!(authorize("secret123", &headers("Bearer secret123")));
        assert!(!authorize("secret123", &headers("Bearer wrong")));
        assert!(!authorize("secret123", &headers("Basic secret123")));
        assert!(!authorize("secret123", &HeaderMap::new()));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(bearer_token("Bearer  spaced "), Some("spaced"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token(""), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
