//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
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
    pub database_url: String,
    pub log_level: Level,
    pub db_max_connections: u32,
    /// How long a login token stays valid.
    pub session_ttl_hours: i64,
    /// Front-end origins allowed by CORS. Empty means any origin.
    pub allowed_origins: Vec<String>,
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
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", 5u32)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Auth and CORS Settings ---
        let session_ttl_hours = parse_or("SESSION_TTL_HOURS", 24 * 30i64)?;
        if session_ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_TTL_HOURS".to_string(),
                "must be positive".to_string(),
            ));
        }

        let allowed_origins = ["FRONT_END_ENDPOINT", "LOCAL_FRONT_ENDPOINT"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            db_max_connections,
            session_ttl_hours,
            allowed_origins,
        })
    }
}

fn parse_or<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
