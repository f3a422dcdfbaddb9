//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::server::middleware::bearer_auth_middleware;
use crate::server::routes::{
    append_run_logs, cancel_run, create_run, fetch_artifact, get_run, get_run_logs,
    health_handler, heartbeat_attempt, lease_run, list_runs, start_attempt, submit_result,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub config: Arc<Config>,
}

/// Build the axum application with all routes and middleware.
pub fn build_app(pool: PgPool, config: Arc<Config>) -> Router {
    let state = AppState {
        db_pool: pool,
        config,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-lease-token"),
        ]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/runs", post(create_run).get(list_runs))
        .route("/runs/lease", post(lease_run))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/cancel", post(cancel_run))
        .route("/runs/:id/logs", get(get_run_logs).post(append_run_logs))
        .route("/runs/:id/start", post(start_attempt))
        .route("/runs/:id/heartbeat", post(heartbeat_attempt))
        .route("/runs/:id/result", post(submit_result))
        .route("/runs/:id/artifact", get(fetch_artifact))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
