//! Consul agent HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Registration, Result, ServiceInstance, ServiceRegistry};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const CHECK_INTERVAL: &str = "10s";
const CHECK_TIMEOUT: &str = "5s";
const DEREGISTER_CRITICAL_AFTER: &str = "30s";

/// [`ServiceRegistry`] backed by a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: NodeEntry,
    service: ServiceEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeEntry {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    check: AgentCheck<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentCheck<'a> {
    #[serde(rename = "HTTP")]
    http: &'a str,
    interval: &'static str,
    timeout: &'static str,
    deregister_critical_service_after: &'static str,
}

impl ConsulRegistry {
    /// Creates a client for the agent at `address` (`host:port` or a full URL).
    pub fn new(address: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: normalize_address(address),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn normalize_address(address: &str) -> String {
    let trimmed = address.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

impl From<HealthEntry> for ServiceInstance {
    fn from(entry: HealthEntry) -> Self {
        // Consul leaves the service address empty when it equals the node address.
        let address = if entry.service.address.is_empty() {
            entry.node.address
        } else {
            entry.service.address
        };
        ServiceInstance::new(entry.service.id, entry.service.service, address, entry.service.port)
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    #[tracing::instrument(skip(self))]
    async fn healthy_instances(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        let url = format!("{}/v1/health/service/{name}", self.base_url);
        let entries: Vec<HealthEntry> = self
            .client
            .get(url)
            .query(&[("passing", "true")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(entries.into_iter().map(ServiceInstance::from).collect())
    }

    #[tracing::instrument(skip(self, registration), fields(id = %registration.id, name = %registration.name))]
    async fn register(&self, registration: &Registration) -> Result<()> {
        let body = AgentRegistration {
            id: &registration.id,
            name: &registration.name,
            address: &registration.address,
            port: registration.port,
            check: AgentCheck {
                http: &registration.health_url,
                interval: CHECK_INTERVAL,
                timeout: CHECK_TIMEOUT,
                deregister_critical_service_after: DEREGISTER_CRITICAL_AFTER,
            },
        };

        self.client
            .put(format!("{}/v1/agent/service/register", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        tracing::info!("service registered");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn deregister(&self, id: &str) -> Result<()> {
        self.client
            .put(format!("{}/v1/agent/service/deregister/{id}", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        tracing::info!("service deregistered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("consul:8500"), "http://consul:8500");
        assert_eq!(normalize_address("http://consul:8500/"), "http://consul:8500");
        assert_eq!(normalize_address("https://c.example"), "https://c.example");
    }

    #[test]
    fn test_health_entry_falls_back_to_node_address() {
        let raw = serde_json::json!([
            {
                "Node": { "Node": "n1", "Address": "10.0.0.9" },
                "Service": { "ID": "order-1", "Service": "order-service", "Address": "", "Port": 8081 },
                "Checks": []
            },
            {
                "Node": { "Node": "n2", "Address": "10.0.0.10" },
                "Service": { "ID": "order-2", "Service": "order-service", "Address": "order-b", "Port": 8081 },
                "Checks": []
            }
        ]);
        let entries: Vec<HealthEntry> = serde_json::from_value(raw).unwrap();
        let instances: Vec<ServiceInstance> = entries.into_iter().map(Into::into).collect();

        assert_eq!(instances[0].address, "10.0.0.9");
        assert_eq!(instances[0].id, "order-1");
        assert_eq!(instances[1].base_url(), "http://order-b:8081");
    }

    #[test]
    fn test_registration_body_shape() {
        let body = AgentRegistration {
            id: "order-1",
            name: "order-service",
            address: "order",
            port: 8081,
            check: AgentCheck {
                http: "http://order:8081/health",
                interval: CHECK_INTERVAL,
                timeout: CHECK_TIMEOUT,
                deregister_critical_service_after: DEREGISTER_CRITICAL_AFTER,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["ID"], "order-1");
        assert_eq!(json["Name"], "order-service");
        assert_eq!(json["Port"], 8081);
        assert_eq!(json["Check"]["HTTP"], "http://order:8081/health");
        assert_eq!(json["Check"]["Interval"], "10s");
        assert_eq!(json["Check"]["Timeout"], "5s");
        assert_eq!(json["Check"]["DeregisterCriticalServiceAfter"], "30s");
    }
}
