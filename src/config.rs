//! Configuration for the Ingestion Service

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    // Document store
    #[serde(default = "default_store_type")]
    pub store_type: String,
    pub database_url: Option<String>,

    // Source catalog
    #[serde(default = "default_sources_path")]
    pub sources_path: PathBuf,

    // Concurrency
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    // Timeouts (seconds)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_upsert_timeout")]
    pub upsert_timeout_secs: u64,

    // Run lifecycle
    #[serde(default = "default_stale_run_threshold")]
    pub stale_run_threshold_secs: u64,
    #[serde(default = "default_store_chunk_size")]
    pub store_chunk_size: usize,
    #[serde(default = "default_max_run_errors")]
    pub max_run_errors: usize,
    /// How long a stopping server waits for background runs
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    // Feed HTTP client
    #[serde(default = "default_http_max_retries")]
    pub http_max_retries: u32,
    #[serde(default = "default_http_user_agent")]
    pub http_user_agent: String,

    // Metrics
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_store_type() -> String {
    "memory".to_string()
}

fn default_sources_path() -> PathBuf {
    PathBuf::from("./config/rss_sources.toml")
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_store_timeout() -> u64 {
    120
}

fn default_upsert_timeout() -> u64 {
    60
}

fn default_stale_run_threshold() -> u64 {
    600 // 10 minutes
}

fn default_store_chunk_size() -> usize {
    200
}

fn default_max_run_errors() -> usize {
    50
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_http_max_retries() -> u32 {
    2
}

fn default_http_user_agent() -> String {
    format!("Perception-Ingestion/{}", env!("CARGO_PKG_VERSION"))
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
            store_type: default_store_type(),
            database_url: None,
            sources_path: default_sources_path(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            fetch_timeout_secs: default_fetch_timeout(),
            store_timeout_secs: default_store_timeout(),
            upsert_timeout_secs: default_upsert_timeout(),
            stale_run_threshold_secs: default_stale_run_threshold(),
            store_chunk_size: default_store_chunk_size(),
            max_run_errors: default_max_run_errors(),
            shutdown_grace_secs: default_shutdown_grace(),
            http_max_retries: default_http_max_retries(),
            http_user_agent: default_http_user_agent(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        // Build config from environment
        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            bail!("MAX_CONCURRENT_FETCHES must be at least 1");
        }
        if self.max_body_bytes == 0 {
            bail!("MAX_BODY_BYTES must be at least 1");
        }
        if self.store_chunk_size == 0 {
            bail!("STORE_CHUNK_SIZE must be at least 1");
        }
        if self.is_postgres() && self.database_url.is_none() {
            bail!("STORE_TYPE=postgres requires DATABASE_URL");
        }
        Ok(())
    }

    /// Checks if the Postgres document store is selected
    pub fn is_postgres(&self) -> bool {
        matches!(self.store_type.as_str(), "postgres" | "postgresql")
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn upsert_timeout(&self) -> Duration {
        Duration::from_secs(self.upsert_timeout_secs)
    }

    pub fn stale_run_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_run_threshold_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
