//! Expiry reaper: reclaims attempts whose lease elapsed without a result.
//!
//! The reaper is a background service that periodically scans for attempts
//! with `lease_expires_at <= NOW()` and resolves each in its own
//! transaction. A failed resolution is simply retried on the next tick,
//! because attempts stay selectable while non-terminal.
//!
//! ```text
//! Reaper (every interval)
//!     │
//!     ├─► scan expired non-terminal attempts (oldest lease first)
//!     └─► per attempt, in one transaction:
//!             cancel path  → attempt cancelled, run cancelled
//!             retry path   → attempt expired, run queued (retry_count++)
//!             dead path    → attempt expired, run dead
//! ```
//!
//! Expiry is always judged against the database clock, never the server's,
//! so a host clock stepping backwards cannot reap live attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::common::{AttemptId, RunId};
use crate::config::Config;
use crate::domains::runs::error::RunStoreError;
use crate::domains::runs::models::attempt::{lock_run, RunAttempt};
use crate::domains::runs::status::{AttemptStatus, RunStatus};

/// Configuration for the reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often to scan for elapsed leases.
    pub interval: Duration,
    /// Maximum number of attempts resolved per tick.
    pub batch_size: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            batch_size: 50,
        }
    }
}

impl ReaperConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.reaper_interval_seconds),
            batch_size: config.reaper_batch_size,
        }
    }
}

/// How a single expired attempt was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The expiry condition no longer held under the transaction.
    Skipped,
    /// Cancellation was in flight; attempt and run are now `cancelled`.
    Cancelled,
    /// Retries remained; the run went back to `queued`.
    Retried,
    /// Retries were exhausted; the run is `dead`.
    Dead,
}

/// Per-tick counters, mostly for logging and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    pub scanned: usize,
    pub cancelled: usize,
    pub retried: usize,
    pub dead: usize,
    pub failed: usize,
}

impl TickSummary {
    pub fn resolved(&self) -> usize {
        self.cancelled + self.retried + self.dead
    }
}

/// Background service that resolves attempts whose lease has elapsed.
pub struct Reaper {
    pool: PgPool,
    config: ReaperConfig,
    shutdown: Arc<AtomicBool>,
}

impl Reaper {
    pub fn new(pool: PgPool, config: ReaperConfig) -> Self {
        Self {
            pool,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a shutdown handle for graceful shutdown.
    ///
    /// Call `store(true, Ordering::SeqCst)` on the returned Arc to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Request shutdown of the reaper.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "reaper starting"
        );

        loop {
            if self.is_shutdown_requested() {
                break;
            }

            match self.tick().await {
                Ok(summary) if summary.resolved() > 0 || summary.failed > 0 => {
                    info!(
                        scanned = summary.scanned,
                        cancelled = summary.cancelled,
                        retried = summary.retried,
                        dead = summary.dead,
                        failed = summary.failed,
                        "reaper tick resolved expired attempts"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "reaper tick failed");
                }
            }

            tokio::time::sleep(self.config.interval).await;
        }

        info!("reaper stopped");
        Ok(())
    }

    /// One scan-and-resolve pass. Public so tests can drive expiry without
    /// waiting out the interval.
    pub async fn tick(&self) -> Result<TickSummary, RunStoreError> {
        let expired: Vec<(AttemptId, RunId)> = sqlx::query_as(
            r#"
            SELECT id, run_id
            FROM run_attempts
            WHERE status IN ('leased', 'running', 'cancelling')
              AND lease_expires_at <= NOW()
            ORDER BY lease_expires_at ASC
            LIMIT $1
            "#,
        )
        .bind(self.config.batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = TickSummary {
            scanned: expired.len(),
            ..Default::default()
        };

        for (attempt_id, run_id) in expired {
            match self.resolve_attempt(attempt_id, run_id).await {
                Ok(Resolution::Skipped) => {}
                Ok(Resolution::Cancelled) => summary.cancelled += 1,
                Ok(Resolution::Retried) => summary.retried += 1,
                Ok(Resolution::Dead) => summary.dead += 1,
                Err(e) => {
                    // Left selectable; the next tick picks it up again.
                    warn!(attempt_id = %attempt_id, error = %e, "failed to resolve expired attempt");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Resolve one expired attempt in its own transaction.
    async fn resolve_attempt(
        &self,
        attempt_id: AttemptId,
        run_id: RunId,
    ) -> Result<Resolution, RunStoreError> {
        let mut tx = self.pool.begin().await?;

        let run = lock_run(&mut tx, run_id).await?;

        // Re-read under the lock; a heartbeat or result may have landed since
        // the scan.
        let attempt = sqlx::query_as::<_, RunAttempt>(
            r#"
            SELECT * FROM run_attempts
            WHERE id = $1
              AND status IN ('leased', 'running', 'cancelling')
              AND lease_expires_at <= NOW()
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(attempt) = attempt else {
            debug!(attempt_id = %attempt_id, "attempt no longer expired; skipping");
            return Ok(Resolution::Skipped);
        };

        let resolution = if run.cancel_requested
            || attempt.status == AttemptStatus::Cancelling
            || run.status == RunStatus::Cancelling
        {
            mark_attempt(&mut tx, attempt_id, AttemptStatus::Cancelled).await?;

            sqlx::query(
                r#"
                UPDATE runs
                SET status = 'cancelled', finished_at = NOW(), updated_at = NOW()
                WHERE id = $1
                  AND status NOT IN ('completed', 'failed', 'cancelled', 'dead')
                "#,
            )
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

            Resolution::Cancelled
        } else if run.retry_count < run.max_retries {
            mark_attempt(&mut tx, attempt_id, AttemptStatus::Expired).await?;

            let result = sqlx::query(
                r#"
                UPDATE runs
                SET status = 'queued',
                    retry_count = retry_count + 1,
                    queued_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1 AND status IN ('leased', 'running')
                "#,
            )
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                self.resolve_raced_run(&mut tx, run_id).await?;
                Resolution::Cancelled
            } else {
                Resolution::Retried
            }
        } else {
            mark_attempt(&mut tx, attempt_id, AttemptStatus::Expired).await?;

            let result = sqlx::query(
                r#"
                UPDATE runs
                SET status = 'dead', finished_at = NOW(), updated_at = NOW()
                WHERE id = $1 AND status IN ('leased', 'running')
                "#,
            )
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                self.resolve_raced_run(&mut tx, run_id).await?;
                Resolution::Cancelled
            } else {
                Resolution::Dead
            }
        };

        tx.commit().await?;

        info!(
            run_id = %run_id,
            attempt_no = attempt.attempt_no,
            resolution = ?resolution,
            "expired attempt resolved"
        );

        Ok(resolution)
    }

    /// Secondary pass for a run-level update that hit zero rows: the run
    /// raced into `cancelling`, so converge it to `cancelled`.
    async fn resolve_raced_run(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        run_id: RunId,
    ) -> Result<(), RunStoreError> {
        sqlx::query(
            r#"
            UPDATE runs
            SET status = 'cancelled', finished_at = NOW(), updated_at = NOW()
            WHERE id = $1
              AND cancel_requested = TRUE
              AND status NOT IN ('completed', 'failed', 'cancelled', 'dead')
            "#,
        )
        .bind(run_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

async fn mark_attempt(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    attempt_id: AttemptId,
    status: AttemptStatus,
) -> Result<(), RunStoreError> {
    sqlx::query(
        r#"
        UPDATE run_attempts
        SET status = $2, finished_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status IN ('leased', 'running', 'cancelling')
        "#,
    )
    .bind(attempt_id)
    .bind(status)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
