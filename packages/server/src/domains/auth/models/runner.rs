//! Registered workers.
//!
//! A runner is bound to one environment at registration; the dispatcher only
//! hands it runs targeting that environment. Registration itself is outside
//! the scheduling core.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::common::{EnvironmentId, RunnerId, TeamId};

#[derive(FromRow, Debug, Clone)]
pub struct Runner {
    pub id: RunnerId,
    pub team_id: TeamId,
    pub environment_id: EnvironmentId,
    pub name: String,
    pub token_hash: String,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Runner {
    /// Look up a runner by the digest of its bearer token.
    pub async fn find_by_digest(pool: &PgPool, digest: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM runners WHERE token_hash = $1")
            .bind(digest)
            .fetch_optional(pool)
            .await
    }
}
