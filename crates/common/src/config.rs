//! Environment-driven configuration shared by every binary in the workspace.
//!
//! Values are read through [`EnvSource`] so tests can supply a plain map instead of
//! mutating the process environment. Empty values count as missing.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while loading configuration. Any of these is fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("{0} is required")]
    Missing(&'static str),

    /// A variable is set but cannot be used.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// A source of configuration variables.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl EnvSource for HashMap<&'static str, &'static str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).map(|v| (*v).to_string())
    }
}

/// Typed accessors over an [`EnvSource`].
pub struct Env<'a> {
    source: &'a dyn EnvSource,
}

impl<'a> Env<'a> {
    pub fn new(source: &'a dyn EnvSource) -> Self {
        Self { source }
    }

    /// Returns the trimmed value, or `None` when unset or blank.
    pub fn optional(&self, key: &str) -> Option<String> {
        self.source
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, key: &'static str) -> Result<String> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    pub fn required_parsed<T>(&self, key: &'static str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required(key)?;
        raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })
    }

    /// Parses an optional variable, falling back to `default` only when it is unset.
    pub fn parsed_or<T>(&self, key: &'static str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    /// Comma-separated list; blank entries are dropped and an empty list is missing.
    pub fn required_list(&self, key: &'static str) -> Result<Vec<String>> {
        let items: Vec<String> = self
            .required(key)?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() {
            return Err(ConfigError::Missing(key));
        }
        Ok(items)
    }
}

/// Settings every saga participant needs: HTTP listener, registry, bus and datastore.
///
/// Reads:
/// - `SERVER_PORT` (required)
/// - `REGISTRY_ADDR` (required): registry HTTP address, e.g. `http://consul:8500`
/// - `BUS_BROKERS` (required): broker list, or a `postgres://` URL for the Postgres bus
/// - `BUS_TOPIC` (required): the topic this participant publishes to; binaries
///   check it with [`ServiceConfig::require_topic`]
/// - `DATABASE_URL` (required)
/// - `HOST` (default `0.0.0.0`)
/// - `ADVERTISE_HOST` (default `HOSTNAME`, then the service name)
/// - `SERVICE_ID` (default `{name}-{advertise_host}-{port}`)
/// - `CONSUMER_MAX_ATTEMPTS` (default `5`)
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub service_name: String,
    pub service_id: String,
    pub host: String,
    pub port: u16,
    pub advertise_host: String,
    pub registry_addr: String,
    pub bus_brokers: Vec<String>,
    pub bus_topic: String,
    pub database_url: String,
    pub consumer_max_attempts: u32,
}

impl ServiceConfig {
    pub fn from_env(service_name: &str, source: &dyn EnvSource) -> Result<Self> {
        let env = Env::new(source);

        let port: u16 = env.required_parsed("SERVER_PORT")?;
        let registry_addr = env.required("REGISTRY_ADDR")?;
        let bus_brokers = env.required_list("BUS_BROKERS")?;
        let bus_topic = env.required("BUS_TOPIC")?;
        let database_url = env.required("DATABASE_URL")?;

        let host = env.optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let advertise_host = env
            .optional("ADVERTISE_HOST")
            .or_else(|| env.optional("HOSTNAME"))
            .unwrap_or_else(|| service_name.to_string());
        let service_id = env
            .optional("SERVICE_ID")
            .unwrap_or_else(|| format!("{service_name}-{advertise_host}-{port}"));

        let consumer_max_attempts = env.parsed_or("CONSUMER_MAX_ATTEMPTS", 5u32)?;
        if consumer_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "CONSUMER_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            service_name: service_name.to_string(),
            service_id,
            host,
            port,
            advertise_host,
            registry_addr,
            bus_brokers,
            bus_topic,
            database_url,
            consumer_max_attempts,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Fails unless `BUS_TOPIC` names `expected`.
    ///
    /// The other participants subscribe to fixed topic names, so publishing
    /// anywhere else would silently stall the saga.
    pub fn require_topic(&self, expected: &str) -> Result<()> {
        if self.bus_topic != expected {
            return Err(ConfigError::Invalid {
                key: "BUS_TOPIC",
                reason: format!("must be {expected}, got {}", self.bus_topic),
            });
        }
        Ok(())
    }

    /// URL the registry should probe for health.
    pub fn health_url(&self) -> String {
        format!("http://{}:{}/health", self.advertise_host, self.port)
    }
}
