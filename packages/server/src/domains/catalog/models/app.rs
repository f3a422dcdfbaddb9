use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::common::{AppId, TeamId};

/// An application owned by a team. Disabled apps keep their queued runs but
/// are skipped by the lease selector.
#[derive(FromRow, Debug, Clone)]
pub struct App {
    pub id: AppId,
    pub team_id: TeamId,
    pub name: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl App {
    pub async fn find_for_team(
        pool: &PgPool,
        app_id: AppId,
        team_id: TeamId,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM apps WHERE id = $1 AND team_id = $2")
            .bind(app_id)
            .bind(team_id)
            .fetch_optional(pool)
            .await
    }
}
