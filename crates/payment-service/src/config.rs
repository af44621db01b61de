//! Payment participant configuration.

use std::time::Duration;

use common::config::{ConfigError, Env, EnvSource, Result, ServiceConfig};
use event_bus::PAYMENT_EVENTS_TOPIC;

use crate::settlement::SettlementConfig;

pub const SERVICE_NAME: &str = "payment-service";

const DEFAULT_SUCCESS_RATE: f64 = 0.9;
const DEFAULT_MOCK_AMOUNT: f64 = 100.0;

/// Settings on top of the shared [`ServiceConfig`].
///
/// Reads:
/// - `SETTLEMENT_DELAY_MS` (default `3000`)
/// - `SETTLEMENT_SUCCESS_RATE` (default `0.9`, within `0..=1`)
/// - `SETTLEMENT_WORKERS` (default `4`, at least 1)
/// - `MOCK_PAYMENT_AMOUNT` (default `100.0`) for payments opened from `order.created`
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub service: ServiceConfig,
    pub settlement: SettlementConfig,
    pub success_rate: f64,
    pub mock_amount: f64,
}

impl Config {
    pub fn from_env(source: &dyn EnvSource) -> Result<Self> {
        let service = ServiceConfig::from_env(SERVICE_NAME, source)?;
        service.require_topic(PAYMENT_EVENTS_TOPIC)?;
        let env = Env::new(source);

        let delay_ms: u64 = env.parsed_or("SETTLEMENT_DELAY_MS", 3000)?;

        let success_rate: f64 = env.parsed_or("SETTLEMENT_SUCCESS_RATE", DEFAULT_SUCCESS_RATE)?;
        if !(0.0..=1.0).contains(&success_rate) {
            return Err(ConfigError::Invalid {
                key: "SETTLEMENT_SUCCESS_RATE",
                reason: "must be between 0 and 1".to_string(),
            });
        }

        let workers: usize = env.parsed_or("SETTLEMENT_WORKERS", SettlementConfig::default().workers)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: "SETTLEMENT_WORKERS",
                reason: "must be at least 1".to_string(),
            });
        }

        let mock_amount: f64 = env.parsed_or("MOCK_PAYMENT_AMOUNT", DEFAULT_MOCK_AMOUNT)?;
        if !mock_amount.is_finite() || mock_amount <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "MOCK_PAYMENT_AMOUNT",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            service,
            settlement: SettlementConfig {
                delay: Duration::from_millis(delay_ms),
                workers,
                ..SettlementConfig::default()
            },
            success_rate,
            mock_amount,
        })
    }
}
