//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `secrecy::SecretString` so it
//! never ends up in logs.

pub mod secrets;

use std::time::Duration;

use crate::error::{Error, Result};
use crate::queue::{DEFAULT_NAMESPACE, DEFAULT_PAYLOAD_GRACE};
use secrets::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Maximum connections in the Postgres pool.
    pub pool_size: u32,
    /// Base namespace for every event set.
    pub namespace: String,
    /// How long a payload outlives its event's expiry.
    pub payload_grace: Duration,
    /// Pause between background sweeps.
    pub sweep_interval: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            pool_size: parsed_var("POOL_SIZE", 10)?,
            namespace: std::env::var("SCOREQ_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string()),
            payload_grace: Duration::from_secs(parsed_var(
                "PAYLOAD_GRACE_SECS",
                DEFAULT_PAYLOAD_GRACE.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(parsed_var("SWEEP_INTERVAL_SECS", 5)?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}
