//! `X-API-KEY` authentication for the HTTP routes.
//!
//! Reads `GARVEN_API_KEY` at startup. If set, every guarded request must carry
//! a matching `x-api-key` header. The key is stored as a SHA-256 hash;
//! comparison uses constant-time equality to prevent timing attacks.
//!
//! If `GARVEN_API_KEY` is not set, authentication is disabled (all requests pass).
//! The WebSocket entrypoint is not guarded here; clusters authenticate with
//! the identify handshake instead.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use garven_cluster::identify::{constant_time_eq, sha256_hex};

use crate::routes::Message;
use crate::AppState;

#[derive(Clone)]
pub struct ApiKeyAuth {
    expected_hash: Option<String>,
}

impl ApiKeyAuth {
    /// Create a new guard.  Pass `Some(key)` to enable auth, `None` to disable.
    pub fn new(api_key: Option<String>) -> Self {
        let expected_hash = api_key.map(|key| sha256_hex(&key));
        if expected_hash.is_some() {
            tracing::info!("HTTP API key authentication enabled");
        } else {
            tracing::warn!("HTTP API key authentication disabled (GARVEN_API_KEY not set)");
        }
        Self { expected_hash }
    }

    /// Check the request headers. `Err` carries the rejection message.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), &'static str> {
        let Some(expected) = &self.expected_hash else {
            return Ok(());
        };

        let token = headers
            .get("x-api-key")
            .ok_or("missing X-API-KEY header")?
            .to_str()
            .map_err(|_| "invalid API key encoding")?;

        if constant_time_eq(sha256_hex(token).as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err("X-API-KEY header invalid")
        }
    }
}

/// Middleware rejecting requests without a valid `X-API-KEY` with 403.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match state.auth.check(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(message) => {
            state.metrics.inc(&state.metrics.auth_rejected_count);
            (StatusCode::FORBIDDEN, Json(Message::new(message))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(key: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(k) = key {
            h.insert("x-api-key", HeaderValue::from_str(k).unwrap());
        }
        h
    }

    #[test]
    fn disabled_lets_everything_through() {
        let auth = ApiKeyAuth::new(None);
        assert!(auth.check(&headers(None)).is_ok());
        assert!(auth.check(&headers(Some("anything"))).is_ok());
    }

    #[test]
    fn enabled_requires_matching_key() {
        let auth = ApiKeyAuth::new(Some("TEST".into()));
        assert!(auth.check(&headers(Some("TEST"))).is_ok());
        assert_eq!(auth.check(&headers(Some("test"))), Err("X-API-KEY header invalid"));
        assert_eq!(auth.check(&headers(None)), Err("missing X-API-KEY header"));
    }
}
