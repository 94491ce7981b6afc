//! Authgate Configuration
//!
//! Environment-driven configuration, read and validated once at startup.
//! Missing or malformed required variables are fatal; durations use the
//! short string format described in [`duration`].

use std::time::Duration;

use thiserror::Error;

mod duration;

pub use duration::parse_duration;

/// Minimum length for JWT signing secrets.
const MIN_SECRET_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {reason}")]
    InvalidVar { var: String, reason: String },

    #[error("Invalid duration string: {0:?}")]
    InvalidDuration(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub broker: BrokerConfig,
    pub jwt: JwtConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// AMQP connection URI
    pub url: String,
    /// Logical queue audit events are published to
    pub audit_queue: String,
}

/// Per-class token signing configuration.
#[derive(Debug, Clone)]
pub struct TokenClassConfig {
    pub secret: String,
    pub expires_in: Duration,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub auth: TokenClassConfig,
    pub refresh: TokenClassConfig,
    pub reset_password: TokenClassConfig,
    /// Refresh tokens closer than this many minutes to expiry are rotated.
    pub refresh_renew_threshold_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: u32,
}

impl AppConfig {
    /// Load and validate the full configuration from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            http: HttpConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_parse_or("PORT", 3000)?,
            },
            database: DatabaseConfig {
                url: env_required("DATABASE_URL")?,
                max_connections: env_parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            redis: RedisConfig {
                url: env_required("REDIS_URL")?,
            },
            broker: BrokerConfig {
                url: env_required("RABBITMQ_URL")?,
                audit_queue: env_or("AUDIT_QUEUE", "audit_queue"),
            },
            jwt: JwtConfig {
                auth: TokenClassConfig {
                    secret: env_secret("JWT_AUTH_SECRET")?,
                    expires_in: env_duration("JWT_AUTH_EXPIRES_IN")?,
                },
                refresh: TokenClassConfig {
                    secret: env_secret("JWT_REFRESH_SECRET")?,
                    expires_in: env_duration("JWT_REFRESH_EXPIRES_IN")?,
                },
                reset_password: TokenClassConfig {
                    secret: env_secret("JWT_RESET_PASSWORD_SECRET")?,
                    expires_in: env_duration("RESET_PASSWORD_EXPIRES_IN")?,
                },
                refresh_renew_threshold_minutes: env_parse_or(
                    "JWT_REFRESH_RENEW_THRESHOLD_MINUTES",
                    20,
                )?,
            },
            outbox: OutboxConfig {
                poll_interval: env_or("OUTBOX_POLL_INTERVAL", "10s")
                    .parse_duration_checked("OUTBOX_POLL_INTERVAL")?,
                batch_size: env_parse_or("OUTBOX_BATCH_SIZE", 100)?,
            },
        })
    }
}

trait ParseDurationExt {
    fn parse_duration_checked(&self, var: &str) -> Result<Duration>;
}

impl ParseDurationExt for String {
    fn parse_duration_checked(&self, var: &str) -> Result<Duration> {
        parse_duration(self).map_err(|_| ConfigError::InvalidVar {
            var: var.to_string(),
            reason: format!("not a valid duration: {self:?}"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(key.to_string())),
    }
}

fn env_secret(key: &str) -> Result<String> {
    let value = env_required(key)?;
    if value.len() < MIN_SECRET_LEN {
        return Err(ConfigError::InvalidVar {
            var: key.to_string(),
            reason: format!("must be at least {MIN_SECRET_LEN} characters"),
        });
    }
    Ok(value)
}

fn env_duration(key: &str) -> Result<Duration> {
    env_required(key)?.parse_duration_checked(key)
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidVar {
            var: key.to_string(),
            reason: format!("cannot parse {v:?}"),
        }),
        Err(_) => Ok(default),
    }
}
