use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Duration;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_error: Option<String>,
    pool_size: u32,
    pool_idle: usize,
}

/// Health check endpoint.
///
/// 200 when the database answers a probe query within 5 seconds,
/// 503 otherwise.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let probe = tokio::time::timeout(
        Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(&state.db_pool),
    )
    .await;

    let database_error = match probe {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(format!("query failed: {}", e)),
        Err(_) => Some("query timeout (>5s)".to_string()),
    };

    let healthy = database_error.is_none();

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        database: if healthy { "ok" } else { "error" },
        database_error,
        pool_size: state.db_pool.size(),
        pool_idle: state.db_pool.num_idle(),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(response))
}
