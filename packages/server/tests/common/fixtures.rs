//! Per-test fixtures.
//!
//! Every test seeds its own team, app, environment, version, and runner.
//! Because the lease selector is scoped to the runner's environment, tests
//! sharing one database cannot see each other's runs.

use minitower_core::common::{
    token_digest, AppId, EnvironmentId, RunId, RunnerId, TeamId, VersionId,
};
use minitower_core::domains::runs::models::{Run, RunAttempt};
use sqlx::PgPool;
use uuid::Uuid;

/// SHA-256 of the canonical test artifact content, b"hello world".
pub const ARTIFACT_CONTENT: &[u8] = b"hello world";
pub const ARTIFACT_SHA256: &str =
    "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

pub struct Fixture {
    pub team_id: TeamId,
    pub app_id: AppId,
    pub environment_id: EnvironmentId,
    pub version_id: VersionId,
    pub runner_id: RunnerId,
    pub team_token: String,
    pub runner_token: String,
    pub artifact_path: String,
}

/// Seed a fully wired team: app, environment, version, one team token, and
/// one runner bound to the environment.
pub async fn seed(pool: &PgPool) -> Fixture {
    let suffix = Uuid::new_v4().simple().to_string();

    let team_id = TeamId::new();
    sqlx::query("INSERT INTO teams (id, name) VALUES ($1, $2)")
        .bind(team_id)
        .bind(format!("team-{}", suffix))
        .execute(pool)
        .await
        .expect("failed to insert team");

    let app_id = AppId::new();
    sqlx::query("INSERT INTO apps (id, team_id, name) VALUES ($1, $2, $3)")
        .bind(app_id)
        .bind(team_id)
        .bind(format!("app-{}", suffix))
        .execute(pool)
        .await
        .expect("failed to insert app");

    let environment_id = seed_environment(pool, team_id, &format!("env-{}", suffix)).await;

    let version_id = VersionId::new();
    let artifact_path = format!("artifact-{}.bin", suffix);
    sqlx::query(
        r#"
        INSERT INTO app_versions (
            id, app_id, version, entrypoint,
            artifact_path, artifact_sha256, artifact_size_bytes
        )
        VALUES ($1, $2, 'v1', 'main.py', $3, $4, $5)
        "#,
    )
    .bind(version_id)
    .bind(app_id)
    .bind(&artifact_path)
    .bind(ARTIFACT_SHA256)
    .bind(ARTIFACT_CONTENT.len() as i64)
    .execute(pool)
    .await
    .expect("failed to insert version");

    let team_token = seed_team_token(pool, team_id).await;
    let (runner_id, runner_token) =
        seed_runner(pool, team_id, environment_id, &format!("runner-{}", suffix)).await;

    Fixture {
        team_id,
        app_id,
        environment_id,
        version_id,
        runner_id,
        team_token,
        runner_token,
        artifact_path,
    }
}

pub async fn seed_environment(pool: &PgPool, team_id: TeamId, name: &str) -> EnvironmentId {
    let environment_id = EnvironmentId::new();
    sqlx::query("INSERT INTO environments (id, team_id, name) VALUES ($1, $2, $3)")
        .bind(environment_id)
        .bind(team_id)
        .bind(name)
        .execute(pool)
        .await
        .expect("failed to insert environment");

    environment_id
}

pub async fn seed_team_token(pool: &PgPool, team_id: TeamId) -> String {
    let token = format!("tok_{}", Uuid::new_v4().simple());
    sqlx::query("INSERT INTO api_tokens (id, team_id, token_hash) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(team_id)
        .bind(token_digest(&token))
        .execute(pool)
        .await
        .expect("failed to insert api token");

    token
}

pub async fn seed_runner(
    pool: &PgPool,
    team_id: TeamId,
    environment_id: EnvironmentId,
    name: &str,
) -> (RunnerId, String) {
    let runner_id = RunnerId::new();
    let token = format!("rt_{}", Uuid::new_v4().simple());
    sqlx::query(
        "INSERT INTO runners (id, team_id, environment_id, name, token_hash) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(runner_id)
    .bind(team_id)
    .bind(environment_id)
    .bind(name)
    .bind(token_digest(&token))
    .execute(pool)
    .await
    .expect("failed to insert runner");

    (runner_id, token)
}

/// Read a run straight from the store, bypassing the API.
pub async fn fetch_run(pool: &PgPool, run_id: RunId) -> Run {
    sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = $1")
        .bind(run_id)
        .fetch_one(pool)
        .await
        .expect("run not found")
}

pub async fn fetch_attempts(pool: &PgPool, run_id: RunId) -> Vec<RunAttempt> {
    RunAttempt::list_for_run(pool, run_id)
        .await
        .expect("failed to list attempts")
}

/// Rewind the active attempt's lease into the past so the reaper sees it as
/// elapsed without waiting out a real TTL.
pub async fn force_expire_lease(pool: &PgPool, run_id: RunId) {
    sqlx::query(
        r#"
        UPDATE run_attempts
        SET lease_expires_at = NOW() - INTERVAL '5 seconds'
        WHERE run_id = $1 AND status IN ('leased', 'running', 'cancelling')
        "#,
    )
    .bind(run_id)
    .execute(pool)
    .await
    .expect("failed to rewind lease");
}

/// Parse a RunId out of an API response body.
pub fn run_id_from(body: &serde_json::Value) -> RunId {
    RunId::parse(body["id"].as_str().expect("missing run id")).expect("invalid run id")
}

/// Submit a run through the API and return its id.
pub async fn submit_run(
    app: &super::TestApp,
    fx: &Fixture,
    priority: i32,
    max_retries: i32,
) -> RunId {
    let res = app
        .client
        .post(
            "/runs",
            Some(&fx.team_token),
            Some(serde_json::json!({
                "app_id": fx.app_id,
                "version_id": fx.version_id,
                "environment_id": fx.environment_id,
                "input": {"n": 1},
                "priority": priority,
                "max_retries": max_retries,
            })),
        )
        .await;
    assert_eq!(
        res.status,
        axum::http::StatusCode::CREATED,
        "create run failed: {:?}",
        res.body
    );

    run_id_from(&res.body)
}

/// A successful lease as seen by the worker.
pub struct Leased {
    pub run_id: RunId,
    pub lease_token: String,
    pub attempt_no: i64,
}

/// Lease the next run for the fixture's runner, asserting one was available.
pub async fn lease_one(app: &super::TestApp, fx: &Fixture) -> Leased {
    let res = app
        .client
        .post("/runs/lease", Some(&fx.runner_token), None)
        .await;
    assert_eq!(
        res.status,
        axum::http::StatusCode::OK,
        "lease failed: {:?}",
        res.body
    );

    Leased {
        run_id: RunId::parse(res.body["run_id"].as_str().expect("missing run_id"))
            .expect("invalid run_id"),
        lease_token: res.body["lease_token"]
            .as_str()
            .expect("missing lease_token")
            .to_string(),
        attempt_no: res.body["attempt_no"].as_i64().expect("missing attempt_no"),
    }
}
