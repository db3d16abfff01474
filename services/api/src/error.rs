//! services/api/src/error.rs
//!
//! Errors that stop the API service from starting or serving. Request-level
//! failures never reach this type; handlers render them as JSON envelopes.

use axum::http::header::InvalidHeaderValue;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting to Postgres failed.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The email pattern of the credential store did not compile.
    #[error("Invalid email pattern: {0}")]
    EmailPattern(#[from] regex::Error),

    #[error("Invalid CORS origin '{origin}': {source}")]
    CorsOrigin {
        origin: String,
        #[source]
        source: InvalidHeaderValue,
    },

    /// Binding or serving the listener failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
