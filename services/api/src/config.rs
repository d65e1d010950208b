//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use boothnow_core::{Rates, SessionPolicy};
use chrono::Duration;
use std::net::SocketAddr;
use std::str::FromStr;
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
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub jwt_secret: String,
    pub cors_origin: String,
    pub rate_per_minute: f64,
    pub minimum_charge: f64,
    pub currency: String,
    pub max_session_minutes: i64,
    pub reservation_hold_minutes: i64,
    pub cancel_grace_seconds: i64,
    pub sweep_interval_seconds: u64,
    pub payment_api_url: String,
    pub payment_api_key: Option<String>,
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address: SocketAddr = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:3000")?;
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingVar("JWT_SECRET".to_string()))?;
        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Pricing ---
        let rate_per_minute: f64 = parse_or(&lookup, "RATE_PER_MINUTE", "0.50")?;
        let minimum_charge: f64 = parse_or(&lookup, "MINIMUM_CHARGE", "5.00")?;
        if !rate_per_minute.is_finite() || rate_per_minute < 0.0 {
            return Err(ConfigError::InvalidValue(
                "RATE_PER_MINUTE".to_string(),
                "must be a non-negative number".to_string(),
            ));
        }
        if !minimum_charge.is_finite() || minimum_charge < 0.0 {
            return Err(ConfigError::InvalidValue(
                "MINIMUM_CHARGE".to_string(),
                "must be a non-negative number".to_string(),
            ));
        }
        let currency = lookup("CURRENCY")
            .unwrap_or_else(|| "usd".to_string())
            .to_lowercase();

        // --- Lifecycle ---
        let max_session_minutes: i64 = parse_positive(&lookup, "MAX_SESSION_MINUTES", "240")?;
        let reservation_hold_minutes: i64 =
            parse_positive(&lookup, "RESERVATION_HOLD_MINUTES", "15")?;
        let cancel_grace_seconds: i64 = parse_or(&lookup, "CANCEL_GRACE_SECONDS", "120")?;
        let sweep_interval_seconds: u64 = parse_or(&lookup, "SWEEP_INTERVAL_SECONDS", "30")?;
        if sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SWEEP_INTERVAL_SECONDS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        // --- Payment processor ---
        let payment_api_url = lookup("PAYMENT_API_URL")
            .unwrap_or_else(|| "https://api.stripe.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let payment_api_key = lookup("PAYMENT_API_KEY").filter(|v| !v.is_empty());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            jwt_secret,
            cors_origin,
            rate_per_minute,
            minimum_charge,
            currency,
            max_session_minutes,
            reservation_hold_minutes,
            cancel_grace_seconds,
            sweep_interval_seconds,
            payment_api_url,
            payment_api_key,
        })
    }

    /// The billing and watchdog policy handed to the session engine.
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            rates: Rates {
                rate_per_minute: self.rate_per_minute,
                minimum_charge: self.minimum_charge,
                currency: self.currency.clone(),
            },
            max_session: Duration::minutes(self.max_session_minutes),
            reservation_hold: Duration::minutes(self.reservation_hold_minutes),
            cancel_grace: Duration::seconds(self.cancel_grace_seconds.max(0)),
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn parse_positive<F>(lookup: &F, key: &str, default: &str) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: i64 = parse_or(lookup, key, default)?;
    if value <= 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = load(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000".parse().unwrap());
        assert!(config.database_url.is_none());
        assert_eq!(config.rate_per_minute, 0.50);
        assert_eq!(config.minimum_charge, 5.00);
        assert_eq!(config.currency, "usd");
        assert_eq!(config.max_session_minutes, 240);
        assert!(config.payment_api_key.is_none());
    }

    #[test]
    fn jwt_secret_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(v)) if v == "JWT_SECRET"));
    }

    #[test]
    fn pricing_is_read_from_the_environment() {
        let config = load(&[
            ("JWT_SECRET", "s3cret"),
            ("RATE_PER_MINUTE", "0.75"),
            ("MINIMUM_CHARGE", "3"),
            ("CURRENCY", "EUR"),
        ])
        .unwrap();
        let policy = config.session_policy();
        assert_eq!(policy.rates.rate_per_minute, 0.75);
        assert_eq!(policy.rates.minimum_charge, 3.0);
        assert_eq!(policy.rates.currency, "eur");
    }

    #[test]
    fn malformed_numbers_name_the_offending_variable() {
        let err = load(&[("JWT_SECRET", "s3cret"), ("RATE_PER_MINUTE", "cheap")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key, _) if key == "RATE_PER_MINUTE"));

        let err = load(&[("JWT_SECRET", "s3cret"), ("MAX_SESSION_MINUTES", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key, _) if key == "MAX_SESSION_MINUTES"));
    }

    #[test]
    fn empty_database_url_means_in_memory() {
        let config = load(&[("JWT_SECRET", "s3cret"), ("DATABASE_URL", "")]).unwrap();
        assert!(config.database_url.is_none());
    }
}
