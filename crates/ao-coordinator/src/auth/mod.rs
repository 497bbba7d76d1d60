//! Authentication boundary.
//!
//! Out of scope: OIDC/JWT verification, user management. This module is the
//! seam a real identity provider would plug into — either disabled entirely
//! (`AUTH_DISABLED=true`, the dev/test default) or a static bearer API key
//! checked against a configured set.

mod error;

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

pub use error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Service,
}

#[derive(Debug, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct CurrentUser(pub Claims);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

#[derive(Clone)]
pub struct AuthState {
    enabled: bool,
    api_keys: Arc<HashSet<String>>,
}

impl AuthState {
    pub fn new(enabled: bool, api_keys: Vec<String>) -> Self {
        Self {
            enabled,
            api_keys: Arc::new(api_keys.into_iter().collect()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Vec::new())
    }
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if !auth.enabled {
        let (mut parts, body) = req.into_parts();
        parts.extensions.insert(CurrentUser(Claims {
            sub: "anonymous".to_string(),
            role: Role::Service,
        }));
        let req = axum::http::Request::from_parts(parts, body);
        return Ok(next.run(req).await);
    }

    let (mut parts, body) = req.into_parts();
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(&mut parts, &())
            .await
            .map_err(|_| AuthError::MissingAuthHeader)?;

    if !auth.api_keys.contains(bearer.token()) {
        return Err(AuthError::InvalidApiKey);
    }

    parts.extensions.insert(CurrentUser(Claims {
        sub: bearer.token().to_string(),
        role: Role::Service,
    }));
    let req = axum::http::Request::from_parts(parts, body);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_state_holds_no_keys() {
        let state = AuthState::disabled();
        assert!(!state.enabled);
        assert!(state.api_keys.is_empty());
    }

    #[test]
    fn enabled_state_tracks_configured_keys() {
        let state = AuthState::new(true, vec!["secret-key".to_string()]);
        assert!(state.api_keys.contains("secret-key"));
    }
}
