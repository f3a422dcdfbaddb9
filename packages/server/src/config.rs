use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// How long a successful lease/heartbeat keeps an attempt alive.
    pub lease_ttl_seconds: i64,
    /// How often the reaper scans for elapsed leases. Must be <= the lease
    /// TTL to bound abandonment latency.
    pub reaper_interval_seconds: u64,
    /// Maximum attempts resolved per reaper tick.
    pub reaper_batch_size: i64,
    /// Log lines longer than this are truncated at ingest.
    pub max_log_line_bytes: usize,
    /// Log batches larger than this are rejected.
    pub max_log_batch_rows: usize,
    /// Artifacts larger than this are refused at fetch time.
    pub max_artifact_bytes: u64,
    /// Directory artifact paths are resolved against.
    pub artifact_root: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            lease_ttl_seconds: env::var("LEASE_TTL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("LEASE_TTL_SECONDS must be a valid number")?,
            reaper_interval_seconds: env::var("REAPER_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("REAPER_INTERVAL_SECONDS must be a valid number")?,
            reaper_batch_size: env::var("REAPER_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("REAPER_BATCH_SIZE must be a valid number")?,
            max_log_line_bytes: env::var("MAX_LOG_LINE_BYTES")
                .unwrap_or_else(|_| "8192".to_string())
                .parse()
                .context("MAX_LOG_LINE_BYTES must be a valid number")?,
            max_log_batch_rows: env::var("MAX_LOG_BATCH_ROWS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .context("MAX_LOG_BATCH_ROWS must be a valid number")?,
            max_artifact_bytes: env::var("MAX_ARTIFACT_BYTES")
                .unwrap_or_else(|_| (256 * 1024 * 1024).to_string())
                .parse()
                .context("MAX_ARTIFACT_BYTES must be a valid number")?,
            artifact_root: env::var("ARTIFACT_ROOT")
                .unwrap_or_else(|_| "./artifacts".to_string())
                .into(),
        };

        if config.reaper_interval_seconds as i64 > config.lease_ttl_seconds {
            tracing::warn!(
                reaper_interval_seconds = config.reaper_interval_seconds,
                lease_ttl_seconds = config.lease_ttl_seconds,
                "reaper interval exceeds lease TTL; abandoned attempts will linger"
            );
        }

        Ok(config)
    }

    /// Lease TTL in milliseconds, the unit the store's interval arithmetic uses.
    pub fn lease_ttl_ms(&self) -> i64 {
        self.lease_ttl_seconds * 1000
    }
}
