//! Team-scoped API tokens.
//!
//! Tokens are opaque; only the SHA-256 digest is stored. Issuance and
//! revocation happen outside the scheduling core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::{TeamId, TokenId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "token_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TokenRole {
    #[default]
    Member,
    Admin,
}

#[derive(FromRow, Debug, Clone)]
pub struct ApiToken {
    pub id: TokenId,
    pub team_id: TeamId,
    pub token_hash: String,
    pub role: TokenRole,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    /// Look up a live token by the digest of its plaintext.
    pub async fn find_active_by_digest(
        pool: &PgPool,
        digest: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM api_tokens WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(digest)
        .fetch_optional(pool)
        .await
    }
}
