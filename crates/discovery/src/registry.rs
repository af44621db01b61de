use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{DiscoveryError, Registration, Result, ServiceInstance};

/// Capability interface over a health-checking service registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Returns the instances of `name` currently passing their health checks.
    async fn healthy_instances(&self, name: &str) -> Result<Vec<ServiceInstance>>;

    /// Announces a service instance along with its health check.
    async fn register(&self, registration: &Registration) -> Result<()>;

    /// Removes a previously registered instance.
    async fn deregister(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl<R: ServiceRegistry + ?Sized> ServiceRegistry for Arc<R> {
    async fn healthy_instances(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        (**self).healthy_instances(name).await
    }

    async fn register(&self, registration: &Registration) -> Result<()> {
        (**self).register(registration).await
    }

    async fn deregister(&self, id: &str) -> Result<()> {
        (**self).deregister(id).await
    }
}

/// In-memory registry for tests and local runs.
///
/// Counts health queries and can be told to fail, so callers' caching and
/// degradation behavior can be observed.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    instances: Arc<RwLock<HashMap<String, Vec<ServiceInstance>>>>,
    queries: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    delay: Arc<std::sync::Mutex<Duration>>,
}

impl InMemoryRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an instance, keyed by id.
    pub async fn add(&self, instance: ServiceInstance) {
        let mut instances = self.instances.write().await;
        let entries = instances.entry(instance.name.clone()).or_default();
        entries.retain(|i| i.id != instance.id);
        entries.push(instance);
    }

    /// Removes an instance by id from every service.
    pub async fn remove(&self, id: &str) {
        let mut instances = self.instances.write().await;
        for entries in instances.values_mut() {
            entries.retain(|i| i.id != id);
        }
    }

    /// Flips the health status of an instance.
    pub async fn set_healthy(&self, id: &str, healthy: bool) {
        let mut instances = self.instances.write().await;
        for instance in instances.values_mut().flatten() {
            if instance.id == id {
                instance.healthy = healthy;
            }
        }
    }

    /// Configures the registry to fail every call.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Makes every later `healthy_instances` call take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.delay.lock() {
            *current = delay;
        }
    }

    /// Number of `healthy_instances` calls received so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Registry("registry unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn healthy_instances(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        let instances = self.instances.read().await;
        Ok(instances
            .get(name)
            .map(|entries| entries.iter().filter(|i| i.healthy).cloned().collect())
            .unwrap_or_default())
    }

    async fn register(&self, registration: &Registration) -> Result<()> {
        self.check_available()?;
        self.add(ServiceInstance::new(
            registration.id.as_str(),
            registration.name.as_str(),
            registration.address.as_str(),
            registration.port,
        ))
        .await;
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<()> {
        self.check_available()?;
        self.remove(id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_healthy_instances_are_listed() {
        let registry = InMemoryRegistry::new();
        registry
            .add(ServiceInstance::new("a", "order-service", "10.0.0.1", 80))
            .await;
        registry
            .add(ServiceInstance::new("b", "order-service", "10.0.0.2", 80).unhealthy())
            .await;

        let healthy = registry.healthy_instances("order-service").await.unwrap();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, "a");
        assert!(registry.healthy_instances("other").await.unwrap().is_empty());
        assert_eq!(registry.query_count(), 2);
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = InMemoryRegistry::new();
        let registration = Registration {
            id: "payment-1".to_string(),
            name: "payment-service".to_string(),
            address: "payment".to_string(),
            port: 8083,
            health_url: "http://payment:8083/health".to_string(),
        };
        registry.register(&registration).await.unwrap();
        assert_eq!(
            registry.healthy_instances("payment-service").await.unwrap()[0].base_url(),
            "http://payment:8083"
        );

        registry.deregister("payment-1").await.unwrap();
        assert!(
            registry
                .healthy_instances("payment-service")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_set_fail() {
        let registry = InMemoryRegistry::new();
        registry.set_fail(true);
        assert!(registry.healthy_instances("x").await.is_err());
        registry.set_fail(false);
        assert!(registry.healthy_instances("x").await.is_ok());
    }
}
