//! Append-only log rows scoped to an attempt.
//!
//! Workers push batches; rows are keyed by `(attempt_id, seq)` with the seq
//! supplied by the worker, so retransmission of a batch is a no-op. The
//! server never renumbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::common::{AttemptId, RunId};
use crate::domains::runs::error::RunStoreError;
use crate::domains::runs::status::LogStream;

/// A stored log row, in the wire shape readers receive.
#[derive(FromRow, Debug, Clone, Serialize)]
pub struct RunLogRow {
    pub seq: i64,
    pub stream: LogStream,
    pub line: String,
    pub logged_at: DateTime<Utc>,
}

/// A log row as submitted by a worker.
#[derive(Debug, Clone, Deserialize)]
pub struct LogRowInput {
    pub seq: i64,
    pub stream: LogStream,
    pub line: String,
    pub logged_at: DateTime<Utc>,
}

impl RunLogRow {
    /// Ingest a batch of rows for the attempt a lease token points at.
    ///
    /// The attempt must still be non-terminal. Duplicate `(attempt_id, seq)`
    /// rows are silently collapsed; the returned count is the number of rows
    /// actually stored. Lines longer than `max_line_bytes` are truncated at a
    /// character boundary.
    pub async fn append_batch(
        pool: &PgPool,
        run_id: RunId,
        token_digest: &str,
        rows: &[LogRowInput],
        max_line_bytes: usize,
    ) -> Result<usize, RunStoreError> {
        let mut tx = pool.begin().await?;

        // Log ingest never touches the run row, so locking the attempt alone
        // cannot invert the run-then-attempt lock order.
        let attempt_id: Option<(AttemptId, bool)> = sqlx::query_as(
            r#"
            SELECT id,
                   status IN ('completed', 'failed', 'cancelled', 'expired') AS is_terminal
            FROM run_attempts
            WHERE run_id = $1 AND lease_token_hash = $2
            FOR UPDATE
            "#,
        )
        .bind(run_id)
        .bind(token_digest)
        .fetch_optional(&mut *tx)
        .await?;

        let (attempt_id, is_terminal) = attempt_id.ok_or(RunStoreError::InvalidLeaseToken)?;
        if is_terminal {
            return Err(RunStoreError::AttemptNotActive);
        }

        let mut stored = 0usize;
        for row in rows {
            let line = truncate_to_boundary(&row.line, max_line_bytes);
            let result = sqlx::query(
                r#"
                INSERT INTO run_logs (attempt_id, seq, stream, line, logged_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (attempt_id, seq) DO NOTHING
                "#,
            )
            .bind(attempt_id)
            .bind(row.seq)
            .bind(row.stream)
            .bind(line)
            .bind(row.logged_at)
            .execute(&mut *tx)
            .await?;

            stored += result.rows_affected() as usize;
        }

        tx.commit().await?;

        Ok(stored)
    }

    /// Rows of an attempt with `seq` strictly greater than `after_seq`,
    /// ordered by `seq`.
    pub async fn page_after(
        pool: &PgPool,
        attempt_id: AttemptId,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<Self>, RunStoreError> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT seq, stream, line, logged_at
            FROM run_logs
            WHERE attempt_id = $1 AND seq > $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(attempt_id)
        .bind(after_seq)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

/// Truncate to at most `max_bytes`, backing off to a UTF-8 boundary.
fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
