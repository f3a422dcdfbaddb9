//! RunAttempt model and the worker-facing attempt protocol.
//!
//! Every operation here is gated on the presented lease token hashing to the
//! stored digest, and re-checks the attempt's state inside the same
//! transaction. Transactions lock the run row before touching the attempt so
//! all writers take locks in the same order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::info;

use crate::common::{AttemptId, RunId, RunnerId};
use crate::domains::runs::error::RunStoreError;
use crate::domains::runs::models::run::Run;
use crate::domains::runs::status::{AttemptStatus, ReportedOutcome, RunStatus};

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct RunAttempt {
    pub id: AttemptId,
    pub run_id: RunId,
    pub attempt_no: i32,
    pub runner_id: RunnerId,
    #[serde(skip_serializing)]
    pub lease_token_hash: String,
    pub lease_expires_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a worker learns from `start` and `heartbeat`: when its lease now
/// expires, and whether cancellation has been requested.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptLiveness {
    pub lease_expires_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

/// Final states recorded by `submit_result`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResultOutcome {
    pub run_status: RunStatus,
    pub attempt_status: AttemptStatus,
}

impl RunAttempt {
    /// All attempts of a run, oldest first.
    pub async fn list_for_run(pool: &PgPool, run_id: RunId) -> Result<Vec<Self>, RunStoreError> {
        let attempts = sqlx::query_as::<_, Self>(
            "SELECT * FROM run_attempts WHERE run_id = $1 ORDER BY attempt_no ASC",
        )
        .bind(run_id)
        .fetch_all(pool)
        .await?;

        Ok(attempts)
    }

    /// The most recent attempt of a run, if any.
    pub async fn find_latest_for_run(
        pool: &PgPool,
        run_id: RunId,
    ) -> Result<Option<Self>, RunStoreError> {
        let attempt = sqlx::query_as::<_, Self>(
            "SELECT * FROM run_attempts WHERE run_id = $1 ORDER BY attempt_no DESC LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(pool)
        .await?;

        Ok(attempt)
    }

    /// Resolve the attempt a lease token points at, requiring it to still be
    /// active. Used by read-only worker calls (artifact fetch).
    pub async fn verify_active(
        pool: &PgPool,
        run_id: RunId,
        token_digest: &str,
    ) -> Result<Self, RunStoreError> {
        let attempt = sqlx::query_as::<_, Self>(
            "SELECT * FROM run_attempts WHERE run_id = $1 AND lease_token_hash = $2",
        )
        .bind(run_id)
        .bind(token_digest)
        .fetch_optional(pool)
        .await?
        .ok_or(RunStoreError::InvalidLeaseToken)?;

        if attempt.status.is_terminal() {
            return Err(RunStoreError::AttemptNotActive);
        }

        Ok(attempt)
    }

    /// Worker `start`: attempt `leased` -> `running`, mirrored to the run,
    /// with the lease extended by one TTL.
    pub async fn start(
        pool: &PgPool,
        run_id: RunId,
        token_digest: &str,
        ttl_ms: i64,
    ) -> Result<AttemptLiveness, RunStoreError> {
        let mut tx = pool.begin().await?;

        let run = lock_run(&mut tx, run_id).await?;
        let attempt = find_by_lease(&mut tx, run_id, token_digest).await?;

        if attempt.status.is_terminal() {
            return Err(RunStoreError::AttemptNotActive);
        }
        if attempt.status != AttemptStatus::Leased {
            return Err(RunStoreError::LeaseConflict(format!(
                "attempt {} is already {:?}",
                attempt.attempt_no, attempt.status
            )));
        }

        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE run_attempts
            SET status = 'running',
                started_at = COALESCE(started_at, NOW()),
                lease_expires_at = GREATEST(
                    lease_expires_at,
                    NOW() + ($2 || ' milliseconds')::INTERVAL
                ),
                updated_at = NOW()
            WHERE id = $1 AND status = 'leased'
            RETURNING *
            "#,
        )
        .bind(attempt.id)
        .bind(ttl_ms.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RunStoreError::LeaseConflict("attempt start lost a race".to_string()))?;

        sqlx::query(
            r#"
            UPDATE runs
            SET status = 'running',
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1 AND status = 'leased'
            "#,
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        touch_runner(&mut tx, updated.runner_id).await?;

        tx.commit().await?;

        info!(run_id = %run_id, attempt_no = updated.attempt_no, "attempt started");

        Ok(AttemptLiveness {
            lease_expires_at: updated.lease_expires_at,
            cancel_requested: run.cancel_requested,
        })
    }

    /// Worker `heartbeat`: extend the lease and report the cancel flag.
    ///
    /// The extension is monotone: `lease_expires_at` only ever advances.
    pub async fn heartbeat(
        pool: &PgPool,
        run_id: RunId,
        token_digest: &str,
        ttl_ms: i64,
    ) -> Result<AttemptLiveness, RunStoreError> {
        let mut tx = pool.begin().await?;

        let run = lock_run(&mut tx, run_id).await?;
        let attempt = find_by_lease(&mut tx, run_id, token_digest).await?;

        if attempt.status.is_terminal() {
            return Err(RunStoreError::AttemptNotActive);
        }

        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE run_attempts
            SET lease_expires_at = GREATEST(
                    lease_expires_at,
                    NOW() + ($2 || ' milliseconds')::INTERVAL
                ),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('leased', 'running', 'cancelling')
            RETURNING *
            "#,
        )
        .bind(attempt.id)
        .bind(ttl_ms.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RunStoreError::AttemptNotActive)?;

        touch_runner(&mut tx, updated.runner_id).await?;

        tx.commit().await?;

        Ok(AttemptLiveness {
            lease_expires_at: updated.lease_expires_at,
            cancel_requested: run.cancel_requested,
        })
    }

    /// Worker `submit-result`: move the attempt to a terminal state and
    /// mirror it to the run.
    ///
    /// A `completed` result is honoured even when cancellation is in flight;
    /// a `failed` result racing a cancel loses to it and the run converges to
    /// `cancelled`.
    pub async fn submit_result(
        pool: &PgPool,
        run_id: RunId,
        token_digest: &str,
        outcome: ReportedOutcome,
        exit_code: Option<i32>,
        error_message: Option<String>,
    ) -> Result<ResultOutcome, RunStoreError> {
        let mut tx = pool.begin().await?;

        let run = lock_run(&mut tx, run_id).await?;
        let attempt = find_by_lease(&mut tx, run_id, token_digest).await?;

        if attempt.status.is_terminal() {
            // Late result after the reaper resolved the attempt: the run's
            // post-reap state must not be altered.
            return Err(RunStoreError::AttemptNotActive);
        }

        let cancel_in_flight = run.cancel_requested
            || attempt.status == AttemptStatus::Cancelling
            || run.status == RunStatus::Cancelling;

        let (attempt_status, run_status) = match outcome {
            ReportedOutcome::Completed => (AttemptStatus::Completed, RunStatus::Completed),
            ReportedOutcome::Cancelled => (AttemptStatus::Cancelled, RunStatus::Cancelled),
            ReportedOutcome::Failed if cancel_in_flight => {
                (AttemptStatus::Cancelled, RunStatus::Cancelled)
            }
            ReportedOutcome::Failed => (AttemptStatus::Failed, RunStatus::Failed),
        };

        let result = sqlx::query(
            r#"
            UPDATE run_attempts
            SET status = $2,
                exit_code = $3,
                error_message = $4,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('leased', 'running', 'cancelling')
            "#,
        )
        .bind(attempt.id)
        .bind(attempt_status)
        .bind(exit_code)
        .bind(&error_message)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RunStoreError::AttemptNotActive);
        }

        sqlx::query(
            r#"
            UPDATE runs
            SET status = $2,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('completed', 'failed', 'cancelled', 'dead')
            "#,
        )
        .bind(run_id)
        .bind(run_status)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            run_id = %run_id,
            attempt_no = attempt.attempt_no,
            reported = ?outcome,
            recorded = ?attempt_status,
            "attempt result recorded"
        );

        Ok(ResultOutcome {
            run_status,
            attempt_status,
        })
    }
}

/// Lock the run row, establishing the run-then-attempt lock order.
pub(crate) async fn lock_run(
    tx: &mut Transaction<'_, Postgres>,
    run_id: RunId,
) -> Result<Run, RunStoreError> {
    sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = $1 FOR UPDATE")
        .bind(run_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(RunStoreError::NotFound)
}

async fn find_by_lease(
    tx: &mut Transaction<'_, Postgres>,
    run_id: RunId,
    token_digest: &str,
) -> Result<RunAttempt, RunStoreError> {
    sqlx::query_as::<_, RunAttempt>(
        "SELECT * FROM run_attempts WHERE run_id = $1 AND lease_token_hash = $2",
    )
    .bind(run_id)
    .bind(token_digest)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(RunStoreError::InvalidLeaseToken)
}

async fn touch_runner(
    tx: &mut Transaction<'_, Postgres>,
    runner_id: RunnerId,
) -> Result<(), RunStoreError> {
    sqlx::query("UPDATE runners SET last_seen_at = NOW() WHERE id = $1")
        .bind(runner_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
