//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development. The trial development override is an
//! explicit flag here — it is never inferred from host names or any other
//! ambient runtime detail.

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
    /// SQLite connection string for the trial ledger.
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    /// Model used for general astrology Q&A.
    pub chat_model: String,
    /// Endpoint returning the caller's public IP as `{ "ip": "..." }`.
    pub identity_url: String,
    /// Base URL of the astrology computation service.
    pub astrology_base_url: String,
    pub astrology_client_id: Option<String>,
    pub astrology_client_secret: Option<String>,
    /// Endpoint accepting waitlist signups.
    pub waitlist_url: Option<String>,
    /// When true the trial gate never blocks and an expired timer re-arms.
    pub trial_dev_override: bool,
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
            .unwrap_or_else(|_| "sqlite://astrobot_trials.db?mode=rwc".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional; checked where the adapter is built) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let astrology_client_id = std::env::var("ASTROLOGY_CLIENT_ID").ok();
        let astrology_client_secret = std::env::var("ASTROLOGY_CLIENT_SECRET").ok();

        // --- Load Adapter-specific Settings ---
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let identity_url = std::env::var("IDENTITY_URL")
            .unwrap_or_else(|_| "https://api.ipify.org?format=json".to_string());
        let astrology_base_url = std::env::var("ASTROLOGY_BASE_URL")
            .unwrap_or_else(|_| "https://api.prokerala.com".to_string());
        let waitlist_url = std::env::var("WAITLIST_URL").ok();

        let trial_dev_override = match std::env::var("TRIAL_DEV_OVERRIDE") {
            Ok(raw) => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(ConfigError::InvalidValue(
                        "TRIAL_DEV_OVERRIDE".to_string(),
                        format!("'{}' is not a boolean", other),
                    ))
                }
            },
            Err(_) => false,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            chat_model,
            identity_url,
            astrology_base_url,
            astrology_client_id,
            astrology_client_secret,
            waitlist_url,
            trial_dev_override,
        })
    }
}
