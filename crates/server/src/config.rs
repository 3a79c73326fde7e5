//! Process configuration, read once at startup.
//!
//! Everything comes from the environment (a `.env` file is honored in
//! development). Misconfiguration is fatal in `main`, never deferred: a bad
//! vault key discovered on the first decrypt would strand every stored
//! token.

use std::time::Duration;

use secrecy::SecretString;
use services::services::vault::{EncryptionError, VaultKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub vault_key: VaultKey,
    pub aggregator_base_url: String,
    pub aggregator_client_id: String,
    pub aggregator_secret: SecretString,
    /// Public URL the provider should deliver webhooks to, when reachable.
    pub webhook_url: Option<String>,
    pub sync_workers: usize,
    pub queue_capacity: usize,
    pub sync_interval: Duration,
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::Missing(var))
}

fn parsed_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let vault_key = VaultKey::parse(&required("NESTBOOK_ENCRYPTION_KEY")?).map_err(
            |e: EncryptionError| ConfigError::Invalid {
                var: "NESTBOOK_ENCRYPTION_KEY",
                reason: e.to_string(),
            },
        )?;

        Ok(Self {
            host: std::env::var("NESTBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed_or("NESTBOOK_PORT", 3000)?,
            database_url: required("DATABASE_URL")?,
            vault_key,
            aggregator_base_url: required("NESTBOOK_AGGREGATOR_BASE_URL")?,
            aggregator_client_id: required("NESTBOOK_AGGREGATOR_CLIENT_ID")?,
            aggregator_secret: SecretString::from(required("NESTBOOK_AGGREGATOR_SECRET")?),
            webhook_url: std::env::var("NESTBOOK_WEBHOOK_URL").ok(),
            sync_workers: parsed_or("NESTBOOK_SYNC_WORKERS", 4)?,
            queue_capacity: parsed_or("NESTBOOK_QUEUE_CAPACITY", 256)?,
            sync_interval: Duration::from_secs(parsed_or(
                "NESTBOOK_SYNC_INTERVAL_SECS",
                6 * 60 * 60,
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    // Env-mutating tests are serialized; each restores nothing because it
    // sets the full variable set it needs.

    fn set_minimum_env() {
        unsafe {
            std::env::set_var(
                "NESTBOOK_ENCRYPTION_KEY",
                "0123456789abcdef0123456789abcdef",
            );
            std::env::set_var("DATABASE_URL", "postgres://localhost/nestbook_test");
            std::env::set_var("NESTBOOK_AGGREGATOR_BASE_URL", "https://sandbox.example.com");
            std::env::set_var("NESTBOOK_AGGREGATOR_CLIENT_ID", "client");
            std::env::set_var("NESTBOOK_AGGREGATOR_SECRET", "secret");
            std::env::remove_var("NESTBOOK_PORT");
            std::env::remove_var("NESTBOOK_SYNC_WORKERS");
            std::env::remove_var("NESTBOOK_WEBHOOK_URL");
        }
    }

    #[test]
    #[serial]
    fn minimum_env_parses_with_defaults() {
        set_minimum_env();
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.sync_workers, 4);
        assert_eq!(config.queue_capacity, 256);
        assert!(config.webhook_url.is_none());
    }

    #[test]
    #[serial]
    fn bad_vault_key_is_fatal() {
        set_minimum_env();
        unsafe { std::env::set_var("NESTBOOK_ENCRYPTION_KEY", "too-short") };
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "NESTBOOK_ENCRYPTION_KEY",
                ..
            }
        ));
    }

    #[test]
    #[serial]
    fn missing_database_url_is_fatal() {
        set_minimum_env();
        unsafe { std::env::remove_var("DATABASE_URL") };
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    #[serial]
    fn garbage_port_is_rejected() {
        set_minimum_env();
        unsafe { std::env::set_var("NESTBOOK_PORT", "not-a-port") };
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "NESTBOOK_PORT", .. }));
        unsafe { std::env::remove_var("NESTBOOK_PORT") };
    }
}
