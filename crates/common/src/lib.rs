//! Plumbing shared by the gateway and the saga participants.

pub mod config;
pub mod http;
pub mod shutdown;
pub mod telemetry;

pub use config::{ConfigError, Env, EnvSource, ProcessEnv, ServiceConfig};
pub use shutdown::shutdown_signal;
