//! Runner-facing endpoints: lease, attempt protocol, artifact fetch.
//!
//! Every attempt call is gated twice: runner bearer auth, then the lease
//! token, which must hash to the targeted attempt's stored digest.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::common::{token_digest, AttemptId, RunId};
use crate::domains::auth::RunnerIdentity;
use crate::domains::catalog::AppVersion;
use crate::domains::runs::dispatcher::{lease_next_run, LeasedRun};
use crate::domains::runs::models::{
    AttemptLiveness, LogRowInput, ResultOutcome, RunAttempt, RunLogRow,
};
use crate::domains::runs::{ReportedOutcome, RunStoreError};
use crate::server::app::AppState;
use crate::server::error::ApiError;
use crate::server::extract::{ApiJson, ApiPath};
use crate::server::middleware::LeaseTokenHeader;

#[derive(Serialize)]
pub struct LeaseResponse {
    pub run_id: RunId,
    pub attempt_id: AttemptId,
    pub attempt_no: i32,
    pub lease_token: String,
    pub lease_expires_at: DateTime<Utc>,
    pub input: Value,
    pub entrypoint: String,
    pub artifact: ArtifactDescriptor,
}

#[derive(Serialize)]
pub struct ArtifactDescriptor {
    pub url: String,
    pub sha256: String,
    pub size_bytes: i64,
}

impl From<LeasedRun> for LeaseResponse {
    fn from(lease: LeasedRun) -> Self {
        Self {
            run_id: lease.run_id,
            attempt_id: lease.attempt_id,
            attempt_no: lease.attempt_no,
            lease_token: lease.lease_token,
            lease_expires_at: lease.lease_expires_at,
            input: lease.input,
            entrypoint: lease.entrypoint,
            artifact: ArtifactDescriptor {
                url: format!("/runs/{}/artifact", lease.run_id),
                sha256: lease.artifact_sha256,
                size_bytes: lease.artifact_size_bytes,
            },
        }
    }
}

#[derive(Deserialize)]
pub struct SubmitResultRequest {
    pub status: ReportedOutcome,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
}

/// POST /runs/lease
pub async fn lease_run(
    State(state): State<AppState>,
    runner: RunnerIdentity,
) -> Result<Response, ApiError> {
    match lease_next_run(&state.db_pool, &runner, state.config.lease_ttl_ms()).await {
        Ok(lease) => Ok(Json(LeaseResponse::from(lease)).into_response()),
        Err(RunStoreError::NoRunAvailable) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(e.into()),
    }
}

/// POST /runs/:id/start
pub async fn start_attempt(
    State(state): State<AppState>,
    ApiPath(run_id): ApiPath<RunId>,
    _runner: RunnerIdentity,
    lease: LeaseTokenHeader,
) -> Result<Json<AttemptLiveness>, ApiError> {
    let digest = token_digest(&lease.0);
    let liveness =
        RunAttempt::start(&state.db_pool, run_id, &digest, state.config.lease_ttl_ms()).await?;

    Ok(Json(liveness))
}

/// POST /runs/:id/heartbeat
pub async fn heartbeat_attempt(
    State(state): State<AppState>,
    ApiPath(run_id): ApiPath<RunId>,
    _runner: RunnerIdentity,
    lease: LeaseTokenHeader,
) -> Result<Json<AttemptLiveness>, ApiError> {
    let digest = token_digest(&lease.0);
    let liveness =
        RunAttempt::heartbeat(&state.db_pool, run_id, &digest, state.config.lease_ttl_ms()).await?;

    Ok(Json(liveness))
}

/// POST /runs/:id/logs
pub async fn append_run_logs(
    State(state): State<AppState>,
    ApiPath(run_id): ApiPath<RunId>,
    _runner: RunnerIdentity,
    lease: LeaseTokenHeader,
    ApiJson(rows): ApiJson<Vec<LogRowInput>>,
) -> Result<Json<Value>, ApiError> {
    if rows.len() > state.config.max_log_batch_rows {
        return Err(ApiError::BadRequest(format!(
            "log batch exceeds {} rows",
            state.config.max_log_batch_rows
        )));
    }

    let digest = token_digest(&lease.0);
    let stored = RunLogRow::append_batch(
        &state.db_pool,
        run_id,
        &digest,
        &rows,
        state.config.max_log_line_bytes,
    )
    .await?;

    Ok(Json(json!({ "stored": stored })))
}

/// POST /runs/:id/result
pub async fn submit_result(
    State(state): State<AppState>,
    ApiPath(run_id): ApiPath<RunId>,
    _runner: RunnerIdentity,
    lease: LeaseTokenHeader,
    ApiJson(req): ApiJson<SubmitResultRequest>,
) -> Result<Json<ResultOutcome>, ApiError> {
    let digest = token_digest(&lease.0);
    let outcome = RunAttempt::submit_result(
        &state.db_pool,
        run_id,
        &digest,
        req.status,
        req.exit_code,
        req.error_message,
    )
    .await?;

    Ok(Json(outcome))
}

/// GET /runs/:id/artifact
pub async fn fetch_artifact(
    State(state): State<AppState>,
    ApiPath(run_id): ApiPath<RunId>,
    _runner: RunnerIdentity,
    lease: LeaseTokenHeader,
) -> Result<Response, ApiError> {
    let digest = token_digest(&lease.0);
    RunAttempt::verify_active(&state.db_pool, run_id, &digest).await?;

    let version = AppVersion::find_for_run(&state.db_pool, run_id)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!("run {} has no version row", run_id))
        })?;

    if version.artifact_size_bytes as u64 > state.config.max_artifact_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "artifact is {} bytes, cap is {}",
            version.artifact_size_bytes, state.config.max_artifact_bytes
        )));
    }

    let path = state.config.artifact_root.join(&version.artifact_path);
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        ApiError::Internal(anyhow::anyhow!(
            "failed to open artifact {}: {}",
            path.display(),
            e
        ))
    })?;

    let body = Body::from_stream(ReaderStream::new(file));

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, version.artifact_size_bytes)
        .header("x-artifact-sha256", &version.artifact_sha256)
        .body(body)
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(response)
}
