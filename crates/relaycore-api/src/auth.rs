//! Bearer-token authentication middleware.
//!
//! Accepts `Authorization: Bearer <key>` or `?api_key=<key>` (spec.md §6).
//! Disabled entirely when the environment override (`RELAYCORE_API_AUTH=off`)
//! is set, in which case every request passes through unchecked.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::token::StoredToken;

/// Shared auth state threaded through axum middleware. `None` means auth is
/// disabled for this process.
#[derive(Clone)]
pub struct AuthState {
    token_hash: Option<Arc<StoredToken>>,
}

impl AuthState {
    pub fn enabled(token_hash: StoredToken) -> Self {
        Self {
            token_hash: Some(Arc::new(token_hash)),
        }
    }

    pub fn disabled() -> Self {
        Self { token_hash: None }
    }
}

pub async fn bearer_auth_mw(State(auth): State<AuthState>, req: Request, next: Next) -> Response {
    let Some(token_hash) = &auth.token_hash else {
        return next.run(req).await;
    };

    let provided = extract_bearer(req.headers()).or_else(|| extract_query_key(req.uri().query()));
    match provided {
        Some(key) if token_hash.verify(&key) => next.run(req).await,
        _ => {
            tracing::warn!("Control API request rejected: missing or wrong bearer token");
            (StatusCode::UNAUTHORIZED, r#"{"error":"unauthorized"}"#).into_response()
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(str::to_string)
}

fn extract_query_key(query: Option<&str>) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=')?;
        if k == "api_key" {
            return Some(v.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_from_valid_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn extract_bearer_missing_header() {
        assert!(extract_bearer(&HeaderMap::new()).is_none());
    }

    #[test]
    fn extract_query_key_finds_api_key() {
        assert_eq!(extract_query_key(Some("channel=cli&api_key=xyz")), Some("xyz".to_string()));
    }

    #[test]
    fn extract_query_key_absent() {
        assert!(extract_query_key(Some("channel=cli")).is_none());
        assert!(extract_query_key(None).is_none());
    }
}
