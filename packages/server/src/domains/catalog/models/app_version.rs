use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::common::{AppId, RunId, VersionId};

/// An immutable code artifact a run is bound to at submission.
#[derive(FromRow, Debug, Clone)]
pub struct AppVersion {
    pub id: VersionId,
    pub app_id: AppId,
    pub version: String,
    pub entrypoint: String,
    pub artifact_path: String,
    pub artifact_sha256: String,
    pub artifact_size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl AppVersion {
    pub async fn find(pool: &PgPool, version_id: VersionId) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM app_versions WHERE id = $1")
            .bind(version_id)
            .fetch_optional(pool)
            .await
    }

    /// The version a run is bound to.
    pub async fn find_for_run(pool: &PgPool, run_id: RunId) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT v.*
            FROM app_versions v
            JOIN runs r ON r.version_id = v.id
            WHERE r.id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(pool)
        .await
    }
}
