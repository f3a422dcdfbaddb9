//! Team-facing run endpoints: submit, inspect, read logs, cancel.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::common::{AppId, EnvironmentId, RunId, VersionId};
use crate::domains::auth::TeamIdentity;
use crate::domains::catalog::{App, AppVersion, Environment};
use crate::domains::runs::models::{NewRun, Run, RunAttempt, RunLogRow};
use crate::domains::runs::RunStatus;
use crate::server::app::AppState;
use crate::server::error::ApiError;
use crate::server::extract::{ApiJson, ApiPath};

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub app_id: AppId,
    pub version_id: VersionId,
    pub environment_id: EnvironmentId,
    #[serde(default = "default_input")]
    pub input: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_retries: i32,
}

fn default_input() -> Value {
    json!({})
}

#[derive(Serialize)]
pub struct RunDetailResponse {
    #[serde(flatten)]
    pub run: Run,
    pub attempts: Vec<RunAttempt>,
}

#[derive(Deserialize)]
pub struct ListRunsQuery {
    pub status: Option<RunStatus>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub after_seq: Option<i64>,
    pub limit: Option<i64>,
}

/// Logs of the run's most recent attempt. `attempt_no` lets a poller detect
/// that a retry started a fresh attempt and reset its cursor.
#[derive(Serialize)]
pub struct LogsPage {
    pub attempt_no: Option<i32>,
    pub rows: Vec<RunLogRow>,
}

/// POST /runs
pub async fn create_run(
    State(state): State<AppState>,
    team: TeamIdentity,
    ApiJson(req): ApiJson<CreateRunRequest>,
) -> Result<(StatusCode, Json<Run>), ApiError> {
    if req.max_retries < 0 {
        return Err(ApiError::BadRequest(
            "max_retries must be non-negative".to_string(),
        ));
    }

    let app = App::find_for_team(&state.db_pool, req.app_id, team.team_id)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .ok_or_else(|| ApiError::NotFound("app not found".to_string()))?;

    Environment::find_for_team(&state.db_pool, req.environment_id, team.team_id)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .ok_or_else(|| ApiError::NotFound("environment not found".to_string()))?;

    let version = AppVersion::find(&state.db_pool, req.version_id)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .ok_or_else(|| ApiError::NotFound("version not found".to_string()))?;

    if version.app_id != app.id {
        return Err(ApiError::BadRequest(
            "version does not belong to the given app".to_string(),
        ));
    }

    let run = Run::create(
        &state.db_pool,
        NewRun {
            team_id: team.team_id,
            app_id: req.app_id,
            environment_id: req.environment_id,
            version_id: req.version_id,
            input: req.input,
            priority: req.priority,
            max_retries: req.max_retries,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(run)))
}

/// GET /runs
pub async fn list_runs(
    State(state): State<AppState>,
    team: TeamIdentity,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Vec<Run>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let runs = Run::list_for_team(&state.db_pool, team.team_id, query.status, limit).await?;

    Ok(Json(runs))
}

/// GET /runs/:id
pub async fn get_run(
    State(state): State<AppState>,
    ApiPath(run_id): ApiPath<RunId>,
    team: TeamIdentity,
) -> Result<Json<RunDetailResponse>, ApiError> {
    let run = Run::find_for_team(&state.db_pool, run_id, team.team_id).await?;
    let attempts = RunAttempt::list_for_run(&state.db_pool, run_id).await?;

    Ok(Json(RunDetailResponse { run, attempts }))
}

/// GET /runs/:id/logs
pub async fn get_run_logs(
    State(state): State<AppState>,
    ApiPath(run_id): ApiPath<RunId>,
    team: TeamIdentity,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsPage>, ApiError> {
    // Visibility check before reading anything attempt-scoped.
    Run::find_for_team(&state.db_pool, run_id, team.team_id).await?;

    let after_seq = query.after_seq.unwrap_or(-1);
    let limit = query.limit.unwrap_or(1000).clamp(1, 1000);

    let Some(attempt) = RunAttempt::find_latest_for_run(&state.db_pool, run_id).await? else {
        return Ok(Json(LogsPage {
            attempt_no: None,
            rows: Vec::new(),
        }));
    };

    let rows = RunLogRow::page_after(&state.db_pool, attempt.id, after_seq, limit).await?;

    Ok(Json(LogsPage {
        attempt_no: Some(attempt.attempt_no),
        rows,
    }))
}

/// POST /runs/:id/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    ApiPath(run_id): ApiPath<RunId>,
    team: TeamIdentity,
) -> Result<Json<Run>, ApiError> {
    let run = Run::request_cancel(&state.db_pool, run_id, team.team_id).await?;

    Ok(Json(run))
}
