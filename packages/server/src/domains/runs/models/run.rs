//! Run model and its guarded state transitions.
//!
//! Every mutator is a conditional UPDATE whose WHERE clause encodes the
//! state-machine precondition; `rows_affected()` detects lost races. Multi-row
//! transitions lock the run row first so all writers agree on lock order
//! (run, then attempt).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::common::{AppId, EnvironmentId, RunId, TeamId, VersionId};
use crate::domains::runs::error::RunStoreError;
use crate::domains::runs::status::RunStatus;

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct Run {
    pub id: RunId,
    pub team_id: TeamId,
    pub app_id: AppId,
    pub environment_id: EnvironmentId,
    pub version_id: VersionId,
    pub input: Value,
    pub priority: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub cancel_requested: bool,
    pub status: RunStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for run submission.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub team_id: TeamId,
    pub app_id: AppId,
    pub environment_id: EnvironmentId,
    pub version_id: VersionId,
    pub input: Value,
    pub priority: i32,
    pub max_retries: i32,
}

impl Run {
    /// Insert a new run in `queued`.
    pub async fn create(pool: &PgPool, new: NewRun) -> Result<Self, RunStoreError> {
        let run = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO runs (
                id, team_id, app_id, environment_id, version_id,
                input, priority, max_retries
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(RunId::new())
        .bind(new.team_id)
        .bind(new.app_id)
        .bind(new.environment_id)
        .bind(new.version_id)
        .bind(&new.input)
        .bind(new.priority)
        .bind(new.max_retries)
        .fetch_one(pool)
        .await?;

        info!(run_id = %run.id, team_id = %run.team_id, "run created");

        Ok(run)
    }

    /// Fetch a run scoped to its owning team.
    pub async fn find_for_team(
        pool: &PgPool,
        run_id: RunId,
        team_id: TeamId,
    ) -> Result<Self, RunStoreError> {
        sqlx::query_as::<_, Self>("SELECT * FROM runs WHERE id = $1 AND team_id = $2")
            .bind(run_id)
            .bind(team_id)
            .fetch_optional(pool)
            .await?
            .ok_or(RunStoreError::NotFound)
    }

    /// List a team's runs, newest first.
    pub async fn list_for_team(
        pool: &PgPool,
        team_id: TeamId,
        status: Option<RunStatus>,
        limit: i64,
    ) -> Result<Vec<Self>, RunStoreError> {
        let runs = match status {
            Some(status) => {
                sqlx::query_as::<_, Self>(
                    r#"
                    SELECT * FROM runs
                    WHERE team_id = $1 AND status = $2
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#,
                )
                .bind(team_id)
                .bind(status)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Self>(
                    r#"
                    SELECT * FROM runs
                    WHERE team_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(team_id)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(runs)
    }

    /// Request cancellation of a run.
    ///
    /// Sets the sticky `cancel_requested` flag, then converges: a queued run
    /// is cancelled immediately; a run with an active attempt moves to
    /// `cancelling` together with the attempt, and the worker observes the
    /// flag on its next heartbeat. Terminal runs are an idempotent no-op.
    pub async fn request_cancel(
        pool: &PgPool,
        run_id: RunId,
        team_id: TeamId,
    ) -> Result<Self, RunStoreError> {
        let mut tx = pool.begin().await?;

        let run = sqlx::query_as::<_, Self>(
            "SELECT * FROM runs WHERE id = $1 AND team_id = $2 FOR UPDATE",
        )
        .bind(run_id)
        .bind(team_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RunStoreError::NotFound)?;

        if run.status.is_terminal() {
            tx.commit().await?;
            return Ok(run);
        }

        // Sticky flag first: no later transition may clear it.
        sqlx::query("UPDATE runs SET cancel_requested = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        match run.status {
            RunStatus::Queued => {
                sqlx::query(
                    r#"
                    UPDATE runs
                    SET status = 'cancelled', finished_at = NOW(), updated_at = NOW()
                    WHERE id = $1 AND status = 'queued'
                    "#,
                )
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
            }
            RunStatus::Leased | RunStatus::Running => {
                sqlx::query(
                    r#"
                    UPDATE runs
                    SET status = 'cancelling', updated_at = NOW()
                    WHERE id = $1 AND status IN ('leased', 'running')
                    "#,
                )
                .bind(run_id)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE run_attempts
                    SET status = 'cancelling', updated_at = NOW()
                    WHERE run_id = $1 AND status IN ('leased', 'running')
                    "#,
                )
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
            }
            // Already converging; the flag is all that was missing.
            RunStatus::Cancelling => {}
            _ => unreachable!("terminal runs returned above"),
        }

        let updated = sqlx::query_as::<_, Self>("SELECT * FROM runs WHERE id = $1")
            .bind(run_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(run_id = %run_id, status = ?updated.status, "cancel requested");

        Ok(updated)
    }
}
