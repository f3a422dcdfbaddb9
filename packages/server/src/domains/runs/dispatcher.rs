//! Lease dispatch: hand the next eligible run to a requesting worker.
//!
//! Candidate selection and attempt creation happen in a single transaction.
//! The candidate row is taken with `FOR UPDATE SKIP LOCKED` so concurrent
//! lease calls never fight over the same run; losers simply see the next
//! candidate or `NoRunAvailable`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, info};

use crate::common::{AttemptId, RunId};
use crate::domains::auth::RunnerIdentity;
use crate::domains::runs::error::RunStoreError;
use crate::domains::runs::lease::mint_lease_token;
use crate::domains::runs::models::run::Run;

/// Everything a worker needs to execute the attempt it was just handed.
///
/// `lease_token` is the plaintext: it is returned to the worker exactly once
/// and only its hash is stored.
#[derive(Debug, Clone)]
pub struct LeasedRun {
    pub run_id: RunId,
    pub attempt_id: AttemptId,
    pub attempt_no: i32,
    pub lease_token: String,
    pub lease_expires_at: DateTime<Utc>,
    pub input: Value,
    pub entrypoint: String,
    pub artifact_sha256: String,
    pub artifact_size_bytes: i64,
}

/// Lease the next eligible run to `runner`.
///
/// Eligible: `queued`, cancel not requested, same environment as the runner,
/// version owned by an enabled app of the runner's team. Ordered by
/// `(priority DESC, queued_at ASC, id ASC)` so repeated leases are
/// reproducible.
pub async fn lease_next_run(
    pool: &PgPool,
    runner: &RunnerIdentity,
    ttl_ms: i64,
) -> Result<LeasedRun, RunStoreError> {
    let mut tx = pool.begin().await?;

    let run = sqlx::query_as::<_, Run>(
        r#"
        SELECT r.*
        FROM runs r
        JOIN apps a ON a.id = r.app_id
        WHERE r.status = 'queued'
          AND r.cancel_requested = FALSE
          AND r.environment_id = $1
          AND a.team_id = $2
          AND a.enabled = TRUE
        ORDER BY r.priority DESC, r.queued_at ASC, r.id ASC
        LIMIT 1
        FOR UPDATE OF r SKIP LOCKED
        "#,
    )
    .bind(runner.environment_id)
    .bind(runner.team_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(RunStoreError::NoRunAvailable)?;

    // A queued run must not have an active attempt; a sibling here means the
    // store's invariant was violated elsewhere, so refuse to double-lease.
    let (active_attempts,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM run_attempts
        WHERE run_id = $1 AND status IN ('leased', 'running', 'cancelling')
        "#,
    )
    .bind(run.id)
    .fetch_one(&mut *tx)
    .await?;

    if active_attempts > 0 {
        error!(run_id = %run.id, active_attempts, "queued run already has an active attempt");
        return Err(RunStoreError::LeaseConflict(
            "run already has an active attempt".to_string(),
        ));
    }

    let (attempt_no,): (i32,) = sqlx::query_as(
        "SELECT COALESCE(MAX(attempt_no), 0) + 1 FROM run_attempts WHERE run_id = $1",
    )
    .bind(run.id)
    .fetch_one(&mut *tx)
    .await?;

    let token = mint_lease_token();

    let (attempt_id, lease_expires_at): (AttemptId, DateTime<Utc>) = sqlx::query_as(
        r#"
        INSERT INTO run_attempts (
            id, run_id, attempt_no, runner_id, lease_token_hash, lease_expires_at
        )
        VALUES ($1, $2, $3, $4, $5, NOW() + ($6 || ' milliseconds')::INTERVAL)
        RETURNING id, lease_expires_at
        "#,
    )
    .bind(AttemptId::new())
    .bind(run.id)
    .bind(attempt_no)
    .bind(runner.runner_id)
    .bind(&token.digest)
    .bind(ttl_ms.to_string())
    .fetch_one(&mut *tx)
    .await?;

    let result = sqlx::query(
        "UPDATE runs SET status = 'leased', updated_at = NOW() WHERE id = $1 AND status = 'queued'",
    )
    .bind(run.id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RunStoreError::LeaseConflict(
            "run left queued state during lease".to_string(),
        ));
    }

    let (entrypoint, artifact_sha256, artifact_size_bytes): (String, String, i64) =
        sqlx::query_as(
            "SELECT entrypoint, artifact_sha256, artifact_size_bytes FROM app_versions WHERE id = $1",
        )
        .bind(run.version_id)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query("UPDATE runners SET last_seen_at = NOW() WHERE id = $1")
        .bind(runner.runner_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        run_id = %run.id,
        attempt_no,
        runner_id = %runner.runner_id,
        "run leased"
    );

    Ok(LeasedRun {
        run_id: run.id,
        attempt_id,
        attempt_no,
        lease_token: token.plaintext,
        lease_expires_at,
        input: run.input,
        entrypoint,
        artifact_sha256,
        artifact_size_bytes,
    })
}
