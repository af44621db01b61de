//! Gateway configuration loaded from environment variables.

use std::time::Duration;

use common::config::{ConfigError, Env, EnvSource, Result};

/// Gateway settings.
///
/// Reads from environment variables:
/// - `SERVER_PORT` (required)
/// - `REGISTRY_ADDR` (required)
/// - `HOST` (default: `"0.0.0.0"`)
/// - `CACHE_TTL_SECS` (default: `5`)
/// - `UPSTREAM_TIMEOUT_SECS` (default: `15`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub registry_addr: String,
    pub cache_ttl: Duration,
    pub upstream_timeout: Duration,
}

impl Config {
    pub fn from_env(source: &dyn EnvSource) -> Result<Self> {
        let env = Env::new(source);

        let port = env.required_parsed("SERVER_PORT")?;
        let registry_addr = env.required("REGISTRY_ADDR")?;
        let host = env.optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let cache_ttl = positive_secs(&env, "CACHE_TTL_SECS", 5)?;
        let upstream_timeout = positive_secs(&env, "UPSTREAM_TIMEOUT_SECS", 15)?;

        Ok(Self {
            host,
            port,
            registry_addr,
            cache_ttl,
            upstream_timeout,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn positive_secs(env: &Env<'_>, key: &'static str, default: u64) -> Result<Duration> {
    let secs: u64 = env.parsed_or(key, default)?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let env = HashMap::from([("SERVER_PORT", "8000"), ("REGISTRY_ADDR", "consul:8500")]);
        let config = Config::from_env(&env).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:8000");
        assert_eq!(config.registry_addr, "consul:8500");
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.upstream_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_missing_registry_is_fatal() {
        let env = HashMap::from([("SERVER_PORT", "8000")]);
        assert_eq!(
            Config::from_env(&env),
            Err(ConfigError::Missing("REGISTRY_ADDR"))
        );
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let env = HashMap::from([
            ("SERVER_PORT", "8000"),
            ("REGISTRY_ADDR", "consul:8500"),
            ("CACHE_TTL_SECS", "0"),
        ]);
        assert!(matches!(
            Config::from_env(&env),
            Err(ConfigError::Invalid {
                key: "CACHE_TTL_SECS",
                ..
            })
        ));
    }
}
