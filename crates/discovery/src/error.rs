use thiserror::Error;

/// Errors raised by registry clients and the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The registry answered, but lists no healthy instance of the service.
    #[error("no healthy instances found for service: {0}")]
    NoHealthyInstance(String),

    /// The registry could not be reached and nothing is cached for the service.
    #[error("service registry unavailable for {service}: {reason}")]
    RegistryUnavailable { service: String, reason: String },

    /// A registry call failed.
    #[error("registry request failed: {0}")]
    Registry(String),
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(err: reqwest::Error) -> Self {
        DiscoveryError::Registry(err.to_string())
    }
}

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
