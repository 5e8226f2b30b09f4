//! Service configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use stockhold_observability::LogFormat;
use thiserror::Error;

use crate::manager::ReservationPolicy;
use crate::sweeper::ExpirySweeper;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    /// Required when `use_persistent_stores` is set.
    pub database_url: Option<String>,
    pub reservation_ttl: Duration,
    pub max_reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub purge_retention: Duration,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            reservation_ttl: Duration::from_secs(900),
            max_reservation_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(30),
            purge_retention: Duration::from_secs(86_400),
            log_format: LogFormat::Json,
        }
    }
}

impl AppConfig {
    /// Reads the process environment; unset variables fall back to
    /// [`AppConfig::default`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let use_persistent_stores = parse_bool("USE_PERSISTENT_STORES", false)?;
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL".to_string()));
        }

        let reservation_ttl = parse_secs("RESERVATION_TTL_SECS", defaults.reservation_ttl)?;
        let max_reservation_ttl =
            parse_secs("MAX_RESERVATION_TTL_SECS", defaults.max_reservation_ttl)?;
        if reservation_ttl > max_reservation_ttl {
            return Err(ConfigError::ParseError {
                key: "RESERVATION_TTL_SECS".to_string(),
                details: format!(
                    "{}s exceeds MAX_RESERVATION_TTL_SECS ({}s)",
                    reservation_ttl.as_secs(),
                    max_reservation_ttl.as_secs()
                ),
            });
        }

        Ok(Self {
            bind_addr: parse_or("BIND_ADDR", defaults.bind_addr)?,
            use_persistent_stores,
            database_url,
            reservation_ttl,
            max_reservation_ttl,
            sweep_interval: parse_secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            purge_retention: parse_secs("PURGE_RETENTION_SECS", defaults.purge_retention)?,
            log_format: parse_or("LOG_FORMAT", defaults.log_format)?,
        })
    }

    /// Reservation lifetime rules derived from this config.
    pub fn policy(&self) -> ReservationPolicy {
        ReservationPolicy::from_std(
            self.reservation_ttl,
            self.max_reservation_ttl,
            self.purge_retention,
        )
    }

    /// Background sweeper settings derived from this config.
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper {
            interval: self.sweep_interval,
            ..ExpirySweeper::default()
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::ParseError {
                key: key.to_string(),
                details: format!("'{other}' is not a boolean"),
            }),
        },
        Err(_) => Ok(default),
    }
}

/// Upper bound for every duration setting (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 86_400;

/// Whole seconds in `1..=MAX_DURATION_SECS`.
fn parse_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(key, default.as_secs())?;
    if !(1..=MAX_DURATION_SECS).contains(&secs) {
        return Err(ConfigError::ParseError {
            key: key.to_string(),
            details: format!("must be between 1 and {MAX_DURATION_SECS} seconds"),
        });
    }
    Ok(Duration::from_secs(secs))
}
