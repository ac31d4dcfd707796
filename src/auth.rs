//! Bearer authentication and agent identification.
//!
//! Every API route behind the auth layer requires `Authorization: Bearer
//! <API_KEY>` when a key is configured; comparison is constant-time.
//! Agent-scoped handlers additionally extract the caller's id from the
//! `X-Agent-ID` header via the [`AgentId`] extractor.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::SwarmError;

#[derive(Clone)]
pub struct AuthState {
    pub api_key: Option<String>,
}

pub fn create_auth_state(api_key: Option<String>) -> Arc<AuthState> {
    Arc::new(AuthState { api_key })
}

/// Bearer-token middleware. CORS preflights pass through; everything else
/// must present the configured key.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let Some(expected_key) = &auth_state.api_key else {
        // No key configured: the broker runs open (local development).
        return Ok(next.run(request).await);
    };

    let path = request.uri().path().to_string();
    let provided = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected_key.as_bytes())) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %path, "authentication failed: invalid key");
            Err(SwarmError::Unauthorized.into_response())
        }
        None => {
            warn!(path = %path, "authentication failed: missing bearer token");
            Err(SwarmError::Unauthorized.into_response())
        }
    }
}

/// Extractor for the calling agent's id from `X-Agent-ID`.
///
/// Missing header is a 400, matching the broker's error contract — the
/// caller authenticated fine but did not say who it is.
#[derive(Debug, Clone)]
pub struct AgentId(pub String);

impl<S> FromRequestParts<S> for AgentId
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-agent-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match id {
            Some(id) => Ok(AgentId(id.to_string())),
            None => Err(SwarmError::MissingAgentHeader.into_response()),
        }
    }
}
