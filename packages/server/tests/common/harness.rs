//! Test harness with testcontainers for integration testing.
//!
//! A single Postgres container is shared across all tests in the binary;
//! migrations run once. Tests isolate themselves through fixtures: every
//! test gets its own team, environment, and runner, and the lease selector
//! only ever sees runs in the caller's environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use minitower_core::domains::runs::reaper::{Reaper, ReaperConfig};
use minitower_core::server::build_app;
use minitower_core::Config;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::client::ApiClient;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    artifact_root: PathBuf,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Respect RUST_LOG when debugging tests; try_init avoids panicking if
        // another test got there first.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        // Run migrations once on the shared database
        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        let artifact_root =
            std::env::temp_dir().join(format!("minitower-test-artifacts-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&artifact_root)
            .await
            .context("Failed to create artifact root")?;

        Ok(Self {
            db_url,
            artifact_root,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// One test's view of the application: a pool, a config, and an in-process
/// API client over the full router.
pub struct TestApp {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub client: ApiClient,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with config overrides (shortened TTLs, tightened caps, ...).
    pub async fn spawn_with(customize: impl FnOnce(&mut Config)) -> Self {
        let infra = SharedTestInfra::get().await;

        // Several tests share the container; keep each pool small so the
        // server's connection limit is never in play.
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&infra.db_url)
            .await
            .expect("Failed to connect to test database");

        let mut config = Config {
            database_url: infra.db_url.clone(),
            port: 0,
            lease_ttl_seconds: 60,
            reaper_interval_seconds: 1,
            reaper_batch_size: 50,
            max_log_line_bytes: 8192,
            max_log_batch_rows: 500,
            max_artifact_bytes: 256 * 1024 * 1024,
            artifact_root: infra.artifact_root.clone(),
        };
        customize(&mut config);
        let config = Arc::new(config);

        let app = build_app(pool.clone(), config.clone());

        Self {
            pool,
            config,
            client: ApiClient::new(app),
        }
    }

    /// A reaper over the same database; tests drive `tick()` directly
    /// instead of waiting out wall-clock intervals.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            self.pool.clone(),
            ReaperConfig {
                interval: Duration::from_secs(1),
                batch_size: 50,
            },
        )
    }

    pub fn artifact_root(&self) -> &PathBuf {
        &self.config.artifact_root
    }
}
