//! Bearer-token authentication middleware and principal extractors.
//!
//! The middleware resolves the Authorization header to a typed identity and
//! attaches it to the request; handlers state which principal kind they need
//! by extracting `TeamIdentity` or `RunnerIdentity`. A missing identity is
//! 401, the wrong kind 403.

use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{debug, error};

use crate::domains::auth::{resolve_bearer, AuthIdentity, RunnerIdentity, TeamIdentity};
use crate::server::app::AppState;
use crate::server::error::ApiError;

/// Header carrying the opaque lease token on worker attempt calls.
pub const LEASE_TOKEN_HEADER: &str = "x-lease-token";

/// Resolve the bearer token, if any, and attach the identity to the request.
///
/// Requests without a resolvable identity continue; handlers that need a
/// principal reject them.
pub async fn bearer_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_bearer(request.headers()) {
        match resolve_bearer(&state.db_pool, token).await {
            Ok(Some(identity)) => {
                debug!(identity = ?identity_kind(&identity), "authenticated request");
                request.extensions_mut().insert(identity);
            }
            Ok(None) => {
                debug!("bearer token did not resolve to an identity");
            }
            Err(e) => {
                // Treated as unauthenticated; the handler decides the status.
                error!(error = %e, "identity lookup failed");
            }
        }
    }

    next.run(request).await
}

/// Extract the bearer token from the Authorization header.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ")
}

fn identity_kind(identity: &AuthIdentity) -> &'static str {
    match identity {
        AuthIdentity::Team(_) => "team",
        AuthIdentity::Runner(_) => "runner",
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TeamIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<AuthIdentity>() {
            Some(AuthIdentity::Team(team)) => Ok(team.clone()),
            Some(AuthIdentity::Runner(_)) => Err(ApiError::Forbidden(
                "runner tokens cannot access team endpoints".to_string(),
            )),
            None => Err(ApiError::Unauthorized),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RunnerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<AuthIdentity>() {
            Some(AuthIdentity::Runner(runner)) => Ok(runner.clone()),
            Some(AuthIdentity::Team(_)) => Err(ApiError::Forbidden(
                "team tokens cannot access runner endpoints".to_string(),
            )),
            None => Err(ApiError::Unauthorized),
        }
    }
}

/// The plaintext lease token presented on a worker attempt call.
#[derive(Debug, Clone)]
pub struct LeaseTokenHeader(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for LeaseTokenHeader {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(LEASE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("missing X-Lease-Token header".to_string()))?;

        Ok(LeaseTokenHeader(value.to_string()))
    }
}
