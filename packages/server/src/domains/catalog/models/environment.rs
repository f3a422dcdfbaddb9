use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::common::{EnvironmentId, TeamId};

/// A routing label: queued runs target one environment, and runners declare
/// theirs at registration.
#[derive(FromRow, Debug, Clone)]
pub struct Environment {
    pub id: EnvironmentId,
    pub team_id: TeamId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub async fn find_for_team(
        pool: &PgPool,
        environment_id: EnvironmentId,
        team_id: TeamId,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM environments WHERE id = $1 AND team_id = $2")
            .bind(environment_id)
            .bind(team_id)
            .fetch_optional(pool)
            .await
    }
}
