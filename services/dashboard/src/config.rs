//! services/dashboard/src/config.rs
//!
//! Defines the service's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use session_ledger_core::metrics::{HealthBand, HealthThresholds, MetricsConfig};
use session_ledger_core::{PaginatorOptions, SortOrder};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which record store adapter backs the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    Memory,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store: StoreBackend,
    pub log_level: Level,
    pub paginator: PaginatorOptions,
    /// Upper bound of raw round-trips a single "load more" may make while the
    /// residual filter keeps emptying pages.
    pub max_auto_pages: usize,
    pub metrics: MetricsConfig,
    pub resubscribe_backoff: Duration,
    /// History views untouched for this long are evicted.
    pub view_idle_timeout: Duration,
    /// Opening one more view than this evicts the owner's least recently used.
    pub max_views_per_owner: usize,
}

/// Parses `raw` as `T`, reporting `var` on failure.
fn parse_value<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))
}

/// Reads `var`, falling back to `default` when unset.
fn env_or<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => parse_value(var, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_backend(kind: &str, database_url: Option<String>) -> Result<StoreBackend, ConfigError> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "postgres" => database_url
            .map(|database_url| StoreBackend::Postgres { database_url })
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string())),
        "memory" => Ok(StoreBackend::Memory),
        other => Err(ConfigError::InvalidValue(
            "STORE_BACKEND".to_string(),
            format!("'{}' is not one of postgres, memory", other),
        )),
    }
}

fn band(prefix: &str, default: HealthBand) -> Result<HealthBand, ConfigError> {
    Ok(HealthBand {
        daily_rate: env_or(&format!("HEALTH_{prefix}_RATE"), default.daily_rate)?,
        success_ratio: env_or(&format!("HEALTH_{prefix}_SUCCESS"), default.success_ratio)?,
    })
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

        // --- Load Server and Store Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = parse_value::<SocketAddr>("BIND_ADDRESS", &bind_address_str)?;

        let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string());
        let store = parse_backend(&backend, std::env::var("DATABASE_URL").ok())?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Pagination Settings ---
        let page_size: usize = env_or("PAGE_SIZE", 50)?;
        if page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "PAGE_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let sort_order: SortOrder = env_or("SORT_ORDER", SortOrder::Descending)?;
        let max_auto_pages = env_or("MAX_AUTO_PAGES", 10)?;

        // --- Load Metrics Settings ---
        let defaults = HealthThresholds::default();
        let thresholds = HealthThresholds {
            excellent: band("EXCELLENT", defaults.excellent)?,
            good: band("GOOD", defaults.good)?,
            warning: band("WARNING", defaults.warning)?,
        };
        let metrics = MetricsConfig {
            thresholds,
            recent_capacity: env_or("RECENT_ACTIVITY_CAPACITY", 10)?,
            debounce: Duration::from_millis(env_or("METRICS_DEBOUNCE_MS", 1000)?),
            debounce_max_wait: Duration::from_millis(env_or("METRICS_DEBOUNCE_MAX_WAIT_MS", 5000)?),
        };
        let resubscribe_backoff = Duration::from_millis(env_or("RESUBSCRIBE_BACKOFF_MS", 2000)?);

        // --- Load View Registry Limits ---
        let view_idle_timeout = Duration::from_secs(env_or("VIEW_IDLE_TIMEOUT_SECS", 1800)?);
        let max_views_per_owner: usize = env_or("MAX_VIEWS_PER_OWNER", 8)?;
        if max_views_per_owner == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_VIEWS_PER_OWNER".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            store,
            log_level,
            paginator: PaginatorOptions {
                page_size,
                sort_order,
            },
            max_auto_pages,
            metrics,
            resubscribe_backoff,
            view_idle_timeout,
            max_views_per_owner,
        })
    }
}

impl Default for Config {
    /// In-memory settings for local runs and tests.
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            store: StoreBackend::Memory,
            log_level: Level::INFO,
            paginator: PaginatorOptions::default(),
            max_auto_pages: 10,
            metrics: MetricsConfig::default(),
            resubscribe_backoff: Duration::from_millis(2000),
            view_idle_timeout: Duration::from_secs(1800),
            max_views_per_owner: 8,
        }
    }
}
