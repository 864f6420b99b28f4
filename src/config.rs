//! Configuration management for taskcycle.
//!
//! Configuration can be set via environment variables:
//! - `TASK_OWNER_ID` - Required. Owner identifier all store operations are scoped to.
//! - `TASK_STORE` - Optional. Store backend: `memory` or `rest`. Defaults to `memory`.
//! - `STORE_URL` - Required for `rest`. Base URL of the PostgREST-compatible store.
//! - `STORE_SERVICE_KEY` - Required for `rest`. Service key sent with every request.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `RECONCILE_INTERVAL_SECS` - Optional. Reconciliation cadence. Defaults to `60`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Memory,
    Rest,
}

impl StoreKind {
    /// Parse from environment variable value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "rest" | "postgrest" | "supabase" => Some(Self::Rest),
            _ => None,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Owner identifier the session reconciles tasks for
    pub owner_id: String,

    /// Which store backend to use
    pub store: StoreKind,

    /// Base URL of the REST store (only with `StoreKind::Rest`)
    pub store_url: Option<String>,

    /// Service key for the REST store (only with `StoreKind::Rest`)
    pub store_service_key: Option<String>,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Cadence of the reconciliation loop
    pub reconcile_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `TASK_OWNER_ID` is not set, or
    /// if the `rest` backend is selected without its URL and service key.
    pub fn from_env() -> Result<Self, ConfigError> {
        let owner_id = std::env::var("TASK_OWNER_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TASK_OWNER_ID".to_string()))?;

        let store = match std::env::var("TASK_STORE") {
            Ok(raw) => StoreKind::parse(&raw)
                .ok_or_else(|| ConfigError::InvalidValue("TASK_STORE".to_string(), raw))?,
            Err(_) => StoreKind::default(),
        };

        let store_url = std::env::var("STORE_URL").ok();
        let store_service_key = std::env::var("STORE_SERVICE_KEY").ok();
        if store == StoreKind::Rest {
            if store_url.is_none() {
                return Err(ConfigError::MissingEnvVar("STORE_URL".to_string()));
            }
            if store_service_key.is_none() {
                return Err(ConfigError::MissingEnvVar("STORE_SERVICE_KEY".to_string()));
            }
        }

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string(), raw))?,
            Err(_) => 3000,
        };

        let reconcile_interval = match std::env::var("RECONCILE_INTERVAL_SECS") {
            Ok(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .ok()
                    .filter(|&s| s >= 1)
                    .ok_or_else(|| {
                        ConfigError::InvalidValue("RECONCILE_INTERVAL_SECS".to_string(), raw)
                    })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(60),
        };

        Ok(Self {
            owner_id,
            store,
            store_url,
            store_service_key,
            host,
            port,
            reconcile_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_kind_parsing() {
        assert_eq!(StoreKind::parse("memory"), Some(StoreKind::Memory));
        assert_eq!(StoreKind::parse("REST"), Some(StoreKind::Rest));
        assert_eq!(StoreKind::parse("supabase"), Some(StoreKind::Rest));
        assert_eq!(StoreKind::parse("sqlite"), None);
    }
}
