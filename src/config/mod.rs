//! Configuration module for the gitpress backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite cache database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Base URL of the remote contents API
    pub remote_api_url: String,
    /// Per-request timeout for remote calls
    pub remote_timeout: Duration,
    /// Retries for transient remote failures
    pub remote_max_retries: u32,
    /// First backoff delay, doubled on every retry
    pub remote_retry_base: Duration,
    /// Maximum in-flight file pipelines during a bulk sync
    pub sync_concurrency: usize,
    /// Repository path of the collection schema configuration
    pub schema_config_path: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("GITPRESS_API_PSK").ok();

        let db_path = env::var("GITPRESS_DB_PATH")
            .unwrap_or_else(|_| "./data/gitpress.sqlite".to_string())
            .into();

        let bind_addr = parse_var("GITPRESS_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("GITPRESS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let remote_api_url = env::var("GITPRESS_REMOTE_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".to_string())
            .trim_end_matches('/')
            .to_string();

        let remote_timeout = Duration::from_secs(parse_var("GITPRESS_REMOTE_TIMEOUT_SECS", "30")?);
        let remote_max_retries = parse_var("GITPRESS_REMOTE_MAX_RETRIES", "3")?;
        let remote_retry_base =
            Duration::from_millis(parse_var("GITPRESS_REMOTE_RETRY_BASE_MS", "250")?);

        let sync_concurrency: usize = parse_var("GITPRESS_SYNC_CONCURRENCY", "10")?;
        if sync_concurrency == 0 {
            return Err(AppError::Internal(
                "GITPRESS_SYNC_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let schema_config_path = env::var("GITPRESS_SCHEMA_CONFIG_PATH")
            .unwrap_or_else(|_| crate::schema::DEFAULT_CONFIG_PATH.to_string());

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            remote_api_url,
            remote_timeout,
            remote_max_retries,
            remote_retry_base,
            sync_concurrency,
            schema_config_path,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| AppError::Internal(format!("Invalid {} value: {:?}", name, raw)))
}
