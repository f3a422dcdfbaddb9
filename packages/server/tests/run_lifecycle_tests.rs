//! End-to-end run lifecycle: submit, lease, start, result, plus the
//! visibility and validation rules of the team-facing surface.

mod common;

use axum::http::StatusCode;
use common::fixtures::{self, fetch_attempts, fetch_run, lease_one, submit_run};
use common::TestApp;
use minitower_core::domains::runs::{AttemptStatus, RunStatus};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_health_endpoint_reports_ok() {
    let app = TestApp::spawn().await;

    let res = app.client.get("/health", None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], json!("healthy"));
    assert_eq!(res.body["database"], json!("ok"));
}

#[tokio::test]
async fn test_happy_path_to_completed() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;

    let run_id = submit_run(&app, &fx, 0, 0).await;
    let run = fetch_run(&app.pool, run_id).await;
    assert_eq!(run.status, RunStatus::Queued);

    let lease = lease_one(&app, &fx).await;
    assert_eq!(lease.run_id, run_id);
    assert_eq!(lease.attempt_no, 1);

    let res = app
        .client
        .post_with_lease(
            &format!("/runs/{}/start", run_id),
            Some(&fx.runner_token),
            &lease.lease_token,
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["cancel_requested"], json!(false));

    let run = fetch_run(&app.pool, run_id).await;
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.started_at.is_some());

    let res = app
        .client
        .post_with_lease(
            &format!("/runs/{}/result", run_id),
            Some(&fx.runner_token),
            &lease.lease_token,
            Some(json!({"status": "completed", "exit_code": 0})),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["run_status"], json!("completed"));
    assert_eq!(res.body["attempt_status"], json!("completed"));

    let run = fetch_run(&app.pool, run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.retry_count, 0);
    assert!(run.finished_at.is_some());

    let attempts = fetch_attempts(&app.pool, run_id).await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Completed);
    assert_eq!(attempts[0].exit_code, Some(0));
    assert!(attempts[0].finished_at.is_some());
}

#[tokio::test]
async fn test_run_detail_includes_attempts_without_lease_hash() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;

    let run_id = submit_run(&app, &fx, 0, 0).await;
    lease_one(&app, &fx).await;

    let res = app
        .client
        .get(&format!("/runs/{}", run_id), Some(&fx.team_token))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], json!("leased"));

    let attempts = res.body["attempts"].as_array().expect("attempts missing");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["status"], json!("leased"));
    assert_eq!(attempts[0]["attempt_no"], json!(1));
    // The lease digest must never appear on the read surface.
    assert!(attempts[0].get("lease_token_hash").is_none());
}

#[tokio::test]
async fn test_create_run_rejects_unknown_references() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;

    // Unknown app
    let res = app
        .client
        .post(
            "/runs",
            Some(&fx.team_token),
            Some(json!({
                "app_id": Uuid::new_v4(),
                "version_id": fx.version_id,
                "environment_id": fx.environment_id,
            })),
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["error"]["code"], json!("not_found"));

    // Unknown environment
    let res = app
        .client
        .post(
            "/runs",
            Some(&fx.team_token),
            Some(json!({
                "app_id": fx.app_id,
                "version_id": fx.version_id,
                "environment_id": Uuid::new_v4(),
            })),
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    // Version belonging to a different app
    let other = fixtures::seed(&app.pool).await;
    let res = app
        .client
        .post(
            "/runs",
            Some(&fx.team_token),
            Some(json!({
                "app_id": fx.app_id,
                "version_id": other.version_id,
                "environment_id": fx.environment_id,
            })),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"]["code"], json!("bad_request"));

    // Negative retry budget
    let res = app
        .client
        .post(
            "/runs",
            Some(&fx.team_token),
            Some(json!({
                "app_id": fx.app_id,
                "version_id": fx.version_id,
                "environment_id": fx.environment_id,
                "max_retries": -1,
            })),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_auth_is_required_and_role_checked() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;

    // No token
    let res = app.client.post("/runs", None, Some(json!({}))).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"]["code"], json!("unauthorized"));

    // Unknown token
    let res = app.client.get("/runs", Some("tok_bogus")).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    // Runner token on a team endpoint
    let res = app.client.get("/runs", Some(&fx.runner_token)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["error"]["code"], json!("forbidden"));

    // Team token on a runner endpoint
    let res = app
        .client
        .post("/runs/lease", Some(&fx.team_token), None)
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_runs_are_invisible_to_other_teams() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;
    let other = fixtures::seed(&app.pool).await;

    let run_id = submit_run(&app, &fx, 0, 0).await;

    let res = app
        .client
        .get(&format!("/runs/{}", run_id), Some(&other.team_token))
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = app
        .client
        .post(
            &format!("/runs/{}/cancel", run_id),
            Some(&other.team_token),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_runs_filters_by_status() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;

    let first = submit_run(&app, &fx, 0, 0).await;
    let second = submit_run(&app, &fx, 0, 0).await;

    let res = app
        .client
        .post(&format!("/runs/{}/cancel", first), Some(&fx.team_token), None)
        .await;
    assert_eq!(res.status, StatusCode::OK);

    let res = app
        .client
        .get("/runs?status=cancelled", Some(&fx.team_token))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    let runs = res.body.as_array().expect("expected array");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["id"], json!(first));

    let res = app.client.get("/runs?limit=1", Some(&fx.team_token)).await;
    let runs = res.body.as_array().expect("expected array");
    assert_eq!(runs.len(), 1);
    // Newest first
    assert_eq!(runs[0]["id"], json!(second));
}

#[tokio::test]
async fn test_duplicate_start_is_a_conflict() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;

    let run_id = submit_run(&app, &fx, 0, 0).await;
    let lease = lease_one(&app, &fx).await;

    let path = format!("/runs/{}/start", run_id);
    let res = app
        .client
        .post_with_lease(&path, Some(&fx.runner_token), &lease.lease_token, None)
        .await;
    assert_eq!(res.status, StatusCode::OK);

    let res = app
        .client
        .post_with_lease(&path, Some(&fx.runner_token), &lease.lease_token, None)
        .await;
    assert_eq!(res.status, StatusCode::CONFLICT);
    assert_eq!(res.body["error"]["code"], json!("conflict"));
}

#[tokio::test]
async fn test_wrong_lease_token_is_gone() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;

    let run_id = submit_run(&app, &fx, 0, 0).await;
    lease_one(&app, &fx).await;

    let res = app
        .client
        .post_with_lease(
            &format!("/runs/{}/start", run_id),
            Some(&fx.runner_token),
            "lt_not_the_token",
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::GONE);
    assert_eq!(res.body["error"]["code"], json!("invalid_lease_token"));
}

#[tokio::test]
async fn test_missing_lease_header_is_bad_request() {
    let app = TestApp::spawn().await;
    let fx = fixtures::seed(&app.pool).await;

    let run_id = submit_run(&app, &fx, 0, 0).await;
    lease_one(&app, &fx).await;

    let res = app
        .client
        .post(
            &format!("/runs/{}/start", run_id),
            Some(&fx.runner_token),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}
