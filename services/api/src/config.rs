//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tutoring_core::BookingPolicy;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which `DocumentStore` implementation backs the marketplace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// Everything lives in process memory and is lost on restart.
    Memory,
    Postgres { database_url: String },
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    pub log_level: Level,
    pub blob_root: PathBuf,
    pub blob_public_url: String,
    pub cors_origin: String,
    pub policy: BookingPolicy,
    pub store_timeout: Duration,
    pub store_read_retries: u32,
}

/// Reads a variable, treating unset and empty the same.
fn var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(lookup, name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
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
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server ---
        let bind_address = parsed(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let log_level_str = var(&lookup, "RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            var(&lookup, "CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Storage ---
        let backend = var(&lookup, "STORE_BACKEND").unwrap_or_else(|| "memory".to_string());
        let store_backend = match backend.trim().to_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres {
                database_url: var(&lookup, "DATABASE_URL")
                    .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?,
            },
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("'{}' is not one of memory, postgres", other),
                ))
            }
        };
        let store_timeout = Duration::from_millis(parsed(&lookup, "STORE_TIMEOUT_MS", 5000u64)?);
        let store_read_retries = parsed(&lookup, "STORE_READ_RETRIES", 3u32)?;

        let blob_root = var(&lookup, "BLOB_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./blobs"));
        let blob_public_url = var(&lookup, "BLOB_PUBLIC_URL")
            .unwrap_or_else(|| "http://localhost:3000/blobs".to_string());

        // --- Booking rules ---
        let cutoff_hours = parsed(&lookup, "CANCELLATION_CUTOFF_HOURS", 5i64)?;
        if cutoff_hours < 0 {
            return Err(ConfigError::InvalidValue(
                "CANCELLATION_CUTOFF_HOURS".to_string(),
                "must not be negative".to_string(),
            ));
        }
        let policy = BookingPolicy {
            cancellation_cutoff: chrono::Duration::hours(cutoff_hours),
            release_old_slot_on_reschedule: parsed(&lookup, "RELEASE_OLD_SLOT_ON_RESCHEDULE", false)?,
            conflict_retries: parsed(&lookup, "BOOKING_CONFLICT_RETRIES", 5u32)?,
        };

        Ok(Self {
            bind_address,
            store_backend,
            log_level,
            blob_root,
            blob_public_url: blob_public_url.trim_end_matches('/').to_string(),
            cors_origin,
            policy,
            store_timeout,
            store_read_retries,
        })
    }
}
