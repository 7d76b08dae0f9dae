//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use summary_stream_core::{AggregatorOptions, PipelineOptions};
use tracing::Level;

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
    /// Postgres connection string. Without it summaries live in memory only.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub summary_model: String,
    pub section_max_words: usize,
    pub brief_overview_words: usize,
    pub strict_invariants: bool,
    pub backend_max_attempts: u32,
    pub persist_max_attempts: u32,
    pub max_concurrent_sections: usize,
    pub stale_after: Duration,
    /// How long a deleted summary keeps rejecting late writes.
    pub tombstone_retention: Duration,
    /// Idle time after which finished summaries leave memory. `None` keeps them.
    pub evict_after: Option<Duration>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address = parse_or("BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Backend Settings ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let summary_model =
            std::env::var("SUMMARY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        // --- Load Aggregation Settings ---
        let section_max_words = positive("SECTION_MAX_WORDS", parse_or("SECTION_MAX_WORDS", 800)?)?;
        let brief_overview_words =
            positive("BRIEF_OVERVIEW_WORDS", parse_or("BRIEF_OVERVIEW_WORDS", 50)?)?;
        let strict_invariants = parse_or("STRICT_INVARIANTS", false)?;
        let backend_max_attempts =
            positive("BACKEND_MAX_ATTEMPTS", parse_or("BACKEND_MAX_ATTEMPTS", 3u32)?)?;
        let persist_max_attempts =
            positive("PERSIST_MAX_ATTEMPTS", parse_or("PERSIST_MAX_ATTEMPTS", 3u32)?)?;
        let max_concurrent_sections =
            positive("MAX_CONCURRENT_SECTIONS", parse_or("MAX_CONCURRENT_SECTIONS", 4)?)?;
        let stale_after = Duration::from_secs(parse_or("STALE_AFTER_SECS", 3600u64)?);
        let tombstone_retention = Duration::from_secs(positive(
            "TOMBSTONE_RETENTION_SECS",
            parse_or("TOMBSTONE_RETENTION_SECS", 600u64)?,
        )?);
        // Zero turns eviction off.
        let evict_after = match parse_or("EVICT_AFTER_SECS", 900u64)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            summary_model,
            section_max_words,
            brief_overview_words,
            strict_invariants,
            backend_max_attempts,
            persist_max_attempts,
            max_concurrent_sections,
            stale_after,
            tombstone_retention,
            evict_after,
        })
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            brief_overview_words: self.brief_overview_words,
            strict_invariants: self.strict_invariants,
            tombstone_retention: self.tombstone_retention,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            section_max_words: self.section_max_words,
            max_concurrent_sections: self.max_concurrent_sections,
            persist_max_attempts: self.persist_max_attempts,
            ..PipelineOptions::default()
        }
    }
}

/// Reads and parses `name`, falling back to `default` when it is unset.
fn parse_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn positive<T>(name: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' must be greater than zero", value),
        ))
    }
}
