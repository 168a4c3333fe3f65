//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use tuvi_core::queue::RetryPolicy;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub ai_model: String,
    pub admin_token: Option<String>,
    pub queue_max_attempts: u32,
    pub queue_backoff: Duration,
    pub queue_visibility_timeout: Duration,
    pub worker_poll_interval: Duration,
    pub worker_concurrency: usize,
    pub seed_admin_email: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3001)))?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Provider and Admin Settings ---
        // An empty key is the same as an absent one.
        let openai_api_key = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        let ai_model = lookup("AI_MODEL").unwrap_or_else(|| "gpt-5-mini".to_string());
        let admin_token = lookup("ADMIN_TOKEN").filter(|t| !t.is_empty());

        // --- Queue and Worker Settings ---
        let defaults = RetryPolicy::default();
        let queue_max_attempts = parse_or(&lookup, "QUEUE_MAX_ATTEMPTS", defaults.max_attempts)?;
        if queue_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "QUEUE_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let queue_backoff = Duration::from_millis(parse_or(&lookup, "QUEUE_BACKOFF_MS", 2000u64)?);
        let queue_visibility_timeout =
            Duration::from_secs(parse_or(&lookup, "QUEUE_VISIBILITY_TIMEOUT_SECS", 300u64)?);
        let worker_poll_interval =
            Duration::from_millis(parse_or(&lookup, "WORKER_POLL_INTERVAL_MS", 1000u64)?);
        let worker_concurrency = parse_or(&lookup, "WORKER_CONCURRENCY", 1usize)?.max(1);

        let seed_admin_email =
            lookup("SEED_ADMIN_EMAIL").unwrap_or_else(|| "admin@tuvi.local".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            ai_model,
            admin_token,
            queue_max_attempts,
            queue_backoff,
            queue_visibility_timeout,
            worker_poll_interval,
            worker_concurrency,
            seed_admin_email,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.queue_max_attempts,
            base_delay: self.queue_backoff,
        }
    }
}

/// Parses `name` when it is set, otherwise falls back to `default`.
fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
