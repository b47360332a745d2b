// Configuration module for post_relay
//
// Every setting is read from the process environment. Broker and database
// variables keep the names the deployed services already use (KAFKA_URL,
// POSTGRES_*); relay tunables live under RELAY_*.
//
// Numeric settings have a MIN/MAX range. Out-of-range values are clamped with
// a warning; values that do not parse are rejected.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::relay::constants::{
    DEFAULT_BOOTSTRAP_SERVERS, DEFAULT_CLIENT_ID, DEFAULT_FAILURE_POLICY,
    DEFAULT_HANDLER_MAX_RETRIES, DEFAULT_MESSAGE_TIMEOUT_MS, DEFAULT_POSTGRES_DATABASE,
    DEFAULT_POSTGRES_HOST, DEFAULT_POSTGRES_PORT, DEFAULT_POSTGRES_USER,
    DEFAULT_PUBLISH_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_SESSION_TIMEOUT_MS,
    DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_STORAGE_BACKEND, DEFAULT_STREAM_ERROR_LIMIT,
    MAX_HANDLER_MAX_RETRIES, MAX_MESSAGE_TIMEOUT_MS, MAX_PUBLISH_TIMEOUT_MS,
    MAX_RETRY_BACKOFF_MS, MAX_SESSION_TIMEOUT_MS, MAX_SHUTDOWN_TIMEOUT_MS,
    MAX_STREAM_ERROR_LIMIT, MIN_HANDLER_MAX_RETRIES, MIN_MESSAGE_TIMEOUT_MS,
    MIN_PUBLISH_TIMEOUT_MS, MIN_RETRY_BACKOFF_MS, MIN_SESSION_TIMEOUT_MS,
    MIN_SHUTDOWN_TIMEOUT_MS, MIN_STREAM_ERROR_LIMIT,
};
use crate::relay::consumer::{FailurePolicy, RuntimeSettings};
use crate::relay::error::{RelayError, Result};
use crate::relay::publisher::PublisherConfig;
use crate::relay::source::SourceConfig;

// ===== Environment variable names =====

pub const ENV_KAFKA_URL: &str = "KAFKA_URL";
pub const ENV_POSTGRES_HOST: &str = "POSTGRES_HOST";
pub const ENV_POSTGRES_PORT: &str = "POSTGRES_PORT";
pub const ENV_POSTGRES_USER: &str = "POSTGRES_USER";
pub const ENV_POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const ENV_POSTGRES_DATABASE: &str = "POSTGRES_DATABASE";
pub const ENV_CLIENT_ID: &str = "RELAY_CLIENT_ID";
pub const ENV_PUBLISH_TIMEOUT_MS: &str = "RELAY_PUBLISH_TIMEOUT_MS";
pub const ENV_MESSAGE_TIMEOUT_MS: &str = "RELAY_MESSAGE_TIMEOUT_MS";
pub const ENV_SESSION_TIMEOUT_MS: &str = "RELAY_SESSION_TIMEOUT_MS";
pub const ENV_ORDER_BY_ENTITY: &str = "RELAY_ORDER_BY_ENTITY";
pub const ENV_HANDLER_MAX_RETRIES: &str = "RELAY_HANDLER_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "RELAY_RETRY_BACKOFF_MS";
pub const ENV_FAILURE_POLICY: &str = "RELAY_FAILURE_POLICY";
pub const ENV_STREAM_ERROR_LIMIT: &str = "RELAY_STREAM_ERROR_LIMIT";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "RELAY_SHUTDOWN_TIMEOUT_MS";
pub const ENV_STORAGE: &str = "RELAY_STORAGE";

/// Where the backend applies commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local tables; used for demos and tests
    Memory,
}

impl FromStr for StorageBackend {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(RelayError::InvalidConfig(format!(
                "unknown storage backend '{}' (expected postgres or memory)",
                other
            ))),
        }
    }
}

/// Connection settings for the posts database
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_POSTGRES_HOST.to_string(),
            port: DEFAULT_POSTGRES_PORT,
            user: DEFAULT_POSTGRES_USER.to_string(),
            password: String::new(),
            database: DEFAULT_POSTGRES_DATABASE.to_string(),
        }
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field(
                "password",
                &if self.password.is_empty() {
                    "<empty>"
                } else {
                    "<redacted>"
                },
            )
            .field("database", &self.database)
            .finish()
    }
}

/// Configuration for the relay, gateway and backend sides alike
#[derive(Clone)]
pub struct Config {
    pub bootstrap_servers: String,
    pub client_id: String,
    pub publish_timeout_ms: u64,
    pub message_timeout_ms: u64,
    pub session_timeout_ms: u64,
    pub order_by_entity: bool,
    pub handler_max_retries: u32,
    pub retry_backoff_ms: u64,
    pub failure_policy: FailurePolicy,
    pub stream_error_limit: u32,
    pub shutdown_timeout_ms: u64,
    pub storage: StorageBackend,
    pub postgres: PostgresConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            order_by_entity: false,
            handler_max_retries: DEFAULT_HANDLER_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            failure_policy: FailurePolicy::DeadLetter,
            stream_error_limit: DEFAULT_STREAM_ERROR_LIMIT,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            storage: StorageBackend::Postgres,
            postgres: PostgresConfig::default(),
        }
    }
}

// Custom Debug that keeps the database password out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("client_id", &self.client_id)
            .field("publish_timeout_ms", &self.publish_timeout_ms)
            .field("message_timeout_ms", &self.message_timeout_ms)
            .field("session_timeout_ms", &self.session_timeout_ms)
            .field("order_by_entity", &self.order_by_entity)
            .field("handler_max_retries", &self.handler_max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("failure_policy", &self.failure_policy)
            .field("stream_error_limit", &self.stream_error_limit)
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .field("storage", &self.storage)
            .field("postgres", &self.postgres)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value
    ///
    /// Unset and empty variables fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let storage = get(ENV_STORAGE)
            .as_deref()
            .unwrap_or(DEFAULT_STORAGE_BACKEND)
            .parse()?;
        let failure_policy = get(ENV_FAILURE_POLICY)
            .as_deref()
            .unwrap_or(DEFAULT_FAILURE_POLICY)
            .parse()?;

        let postgres = PostgresConfig {
            host: get(ENV_POSTGRES_HOST).unwrap_or_else(|| DEFAULT_POSTGRES_HOST.to_string()),
            port: match get(ENV_POSTGRES_PORT) {
                Some(raw) => parse_number(ENV_POSTGRES_PORT, &raw)?,
                None => DEFAULT_POSTGRES_PORT,
            },
            user: get(ENV_POSTGRES_USER).unwrap_or_else(|| DEFAULT_POSTGRES_USER.to_string()),
            password: lookup(ENV_POSTGRES_PASSWORD).unwrap_or_default(),
            database: get(ENV_POSTGRES_DATABASE)
                .unwrap_or_else(|| DEFAULT_POSTGRES_DATABASE.to_string()),
        };

        Ok(Config {
            bootstrap_servers: get(ENV_KAFKA_URL)
                .unwrap_or_else(|| DEFAULT_BOOTSTRAP_SERVERS.to_string()),
            client_id: get(ENV_CLIENT_ID).unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            publish_timeout_ms: ranged(
                ENV_PUBLISH_TIMEOUT_MS,
                get(ENV_PUBLISH_TIMEOUT_MS),
                DEFAULT_PUBLISH_TIMEOUT_MS,
                MIN_PUBLISH_TIMEOUT_MS,
                MAX_PUBLISH_TIMEOUT_MS,
            )?,
            message_timeout_ms: ranged(
                ENV_MESSAGE_TIMEOUT_MS,
                get(ENV_MESSAGE_TIMEOUT_MS),
                DEFAULT_MESSAGE_TIMEOUT_MS,
                MIN_MESSAGE_TIMEOUT_MS,
                MAX_MESSAGE_TIMEOUT_MS,
            )?,
            session_timeout_ms: ranged(
                ENV_SESSION_TIMEOUT_MS,
                get(ENV_SESSION_TIMEOUT_MS),
                DEFAULT_SESSION_TIMEOUT_MS,
                MIN_SESSION_TIMEOUT_MS,
                MAX_SESSION_TIMEOUT_MS,
            )?,
            order_by_entity: match get(ENV_ORDER_BY_ENTITY) {
                Some(raw) => parse_bool(ENV_ORDER_BY_ENTITY, &raw)?,
                None => false,
            },
            handler_max_retries: ranged(
                ENV_HANDLER_MAX_RETRIES,
                get(ENV_HANDLER_MAX_RETRIES),
                DEFAULT_HANDLER_MAX_RETRIES,
                MIN_HANDLER_MAX_RETRIES,
                MAX_HANDLER_MAX_RETRIES,
            )?,
            retry_backoff_ms: ranged(
                ENV_RETRY_BACKOFF_MS,
                get(ENV_RETRY_BACKOFF_MS),
                DEFAULT_RETRY_BACKOFF_MS,
                MIN_RETRY_BACKOFF_MS,
                MAX_RETRY_BACKOFF_MS,
            )?,
            failure_policy,
            stream_error_limit: ranged(
                ENV_STREAM_ERROR_LIMIT,
                get(ENV_STREAM_ERROR_LIMIT),
                DEFAULT_STREAM_ERROR_LIMIT,
                MIN_STREAM_ERROR_LIMIT,
                MAX_STREAM_ERROR_LIMIT,
            )?,
            shutdown_timeout_ms: ranged(
                ENV_SHUTDOWN_TIMEOUT_MS,
                get(ENV_SHUTDOWN_TIMEOUT_MS),
                DEFAULT_SHUTDOWN_TIMEOUT_MS,
                MIN_SHUTDOWN_TIMEOUT_MS,
                MAX_SHUTDOWN_TIMEOUT_MS,
            )?,
            storage,
            postgres,
        })
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            handler_max_retries: self.handler_max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
            failure_policy: self.failure_policy,
            stream_error_limit: self.stream_error_limit,
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            bootstrap_servers: self.bootstrap_servers.clone(),
            client_id: self.client_id.clone(),
            message_timeout_ms: self.message_timeout_ms,
            order_by_entity: self.order_by_entity,
        }
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            bootstrap_servers: self.bootstrap_servers.clone(),
            client_id: self.client_id.clone(),
            session_timeout_ms: self.session_timeout_ms,
        }
    }
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        RelayError::InvalidConfig(format!("{} must be a non-negative integer, got '{}'", name, raw))
    })
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RelayError::InvalidConfig(format!(
            "{} must be a boolean, got '{}'",
            name, raw
        ))),
    }
}

/// Parse an optional numeric setting, clamping it into [min, max]
fn ranged<T>(name: &str, raw: Option<String>, default: T, min: T, max: T) -> Result<T>
where
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: T = parse_number(name, &raw)?;
    if value < min {
        warn!("{}={} is below the minimum, using {}", name, value, min);
        Ok(min)
    } else if value > max {
        warn!("{}={} is above the maximum, using {}", name, value, max);
        Ok(max)
    } else {
        Ok(value)
    }
}
