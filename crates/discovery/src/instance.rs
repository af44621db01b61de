use serde::{Deserialize, Serialize};

/// One running copy of a logical service as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub healthy: bool,
}

impl ServiceInstance {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            healthy: true,
        }
    }

    /// Marks the instance as failing its health check.
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Base URL of the instance, e.g. `http://10.0.0.7:8081`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

/// What a service announces about itself when it registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    /// URL the registry probes to decide health.
    pub health_url: String,
}
