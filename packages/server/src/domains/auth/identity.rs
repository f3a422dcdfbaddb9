//! Request identity resolved from a bearer token.
//!
//! Identity is a typed value attached to the request by the auth middleware
//! and consumed by handlers; it never lives in globals.

use sqlx::PgPool;

use crate::common::{token_digest, EnvironmentId, RunnerId, TeamId, TokenId};
use crate::domains::auth::models::{ApiToken, Runner, TokenRole};

/// A caller acting on behalf of a team.
#[derive(Clone, Debug)]
pub struct TeamIdentity {
    pub token_id: TokenId,
    pub team_id: TeamId,
    pub role: TokenRole,
}

/// A worker identified by its runner token.
#[derive(Clone, Debug)]
pub struct RunnerIdentity {
    pub runner_id: RunnerId,
    pub team_id: TeamId,
    pub environment_id: EnvironmentId,
}

/// The two principal kinds the core distinguishes.
#[derive(Clone, Debug)]
pub enum AuthIdentity {
    Team(TeamIdentity),
    Runner(RunnerIdentity),
}

/// Resolve a plaintext bearer token to an identity, if any.
///
/// Team tokens and runner tokens share the header; the digest is matched
/// against both tables.
pub async fn resolve_bearer(
    pool: &PgPool,
    raw_token: &str,
) -> Result<Option<AuthIdentity>, sqlx::Error> {
    let digest = token_digest(raw_token);

    if let Some(token) = ApiToken::find_active_by_digest(pool, &digest).await? {
        return Ok(Some(AuthIdentity::Team(TeamIdentity {
            token_id: token.id,
            team_id: token.team_id,
            role: token.role,
        })));
    }

    if let Some(runner) = Runner::find_by_digest(pool, &digest).await? {
        return Ok(Some(AuthIdentity::Runner(RunnerIdentity {
            runner_id: runner.id,
            team_id: runner.team_id,
            environment_id: runner.environment_id,
        })));
    }

    Ok(None)
}
