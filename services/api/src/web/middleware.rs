//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::rest::Failure;
use crate::web::state::AppState;

/// Reads the auth token from the `session` cookie, falling back to an
/// `Authorization: Bearer` header for non-browser clients.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|c| {
                let c = c.trim();
                c.strip_prefix("session=")
            })
        })
        .filter(|token| !token.is_empty());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    })
}

/// Middleware that validates the auth token and resolves the caller.
///
/// If valid, inserts the caller's `UserIdentity` into request extensions for
/// handlers to use. If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, Failure> {
    // 1. Extract the token
    let token = session_token(req.headers()).ok_or_else(Failure::unauthenticated)?;

    // 2. Validate it with the auth provider, get the uid
    let uid = state.auth.verify_token(token).await.map_err(|e| {
        warn!("Rejected auth token: {}", e.code());
        Failure::unauthenticated()
    })?;

    // 3. Resolve the uid to a profile so handlers know the caller's role
    let identity = state.market.identity_for(&uid).await.map_err(|e| {
        error!("Failed to load profile for {}: {:?}", uid, e);
        Failure::unauthenticated()
    })?;

    // 4. Insert the identity into request extensions
    req.extensions_mut().insert(identity);

    // 5. Continue to the handler
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_wins_over_bearer_and_blank_values_are_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(session_token(&headers), Some("abc"));

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=xyz"));
        assert_eq!(session_token(&headers), Some("xyz"));

        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&headers), Some("abc"));
    }
}
