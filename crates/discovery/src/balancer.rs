//! Cached, round-robin instance selection.
//!
//! Each logical service name gets its own cache entry with an expiry and a
//! selection counter. A resolve that finds its entry expired holds the entry's
//! mutex across the registry call, so concurrent resolves of an expired name
//! trigger one query while other names carry on unaffected.
//!
//! The background refresher queries the registry without the mutex and only
//! locks to swap in the answer, so warm resolves never wait on the network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{DiscoveryError, Result, ServiceInstance, ServiceRegistry};

/// How long a registry answer is trusted.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct CacheState {
    instances: Arc<Vec<ServiceInstance>>,
    /// `None` until the first successful registry answer.
    expires_at: Option<Instant>,
    degraded: bool,
}

#[derive(Debug, Default)]
struct ServiceEntry {
    cache: Mutex<CacheState>,
    counter: AtomicUsize,
    /// Set while a background refresh of this entry is in flight.
    refreshing: AtomicBool,
}

/// Clears an entry's `refreshing` flag, even if the refresh is cancelled.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub instances: Vec<ServiceInstance>,
    /// Set while the entry is served from a stale list because the registry failed.
    pub degraded: bool,
    pub fresh: bool,
}

/// Resolves logical service names to instances.
pub struct LoadBalancer<R> {
    registry: R,
    ttl: Duration,
    entries: RwLock<HashMap<String, Arc<ServiceEntry>>>,
}

impl<R: ServiceRegistry + 'static> LoadBalancer<R> {
    /// Creates a balancer with the default cache TTL.
    pub fn new(registry: R) -> Self {
        Self::with_ttl(registry, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(registry: R, ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Picks the next instance of `service`.
    ///
    /// Serves from the cache while it is fresh; otherwise queries the registry
    /// first. Fails with [`DiscoveryError::NoHealthyInstance`] when the registry
    /// lists nothing healthy, and with [`DiscoveryError::RegistryUnavailable`]
    /// when the registry fails before anything was ever cached.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, service: &str) -> Result<ServiceInstance> {
        let entry = self.entry(service).await;

        let instances = {
            let mut cache = entry.cache.lock().await;
            let fresh = cache.expires_at.is_some_and(|at| Instant::now() < at);
            if !fresh {
                self.refresh_locked(service, &mut cache).await?;
            }
            cache.instances.clone()
        };

        if instances.is_empty() {
            return Err(DiscoveryError::NoHealthyInstance(service.to_string()));
        }

        let index = entry.counter.fetch_add(1, Ordering::Relaxed) % instances.len();
        Ok(instances[index].clone())
    }

    /// Resolves `service` to the base URL of the chosen instance.
    pub async fn resolve_url(&self, service: &str) -> Result<String> {
        Ok(self.resolve(service).await?.base_url())
    }

    /// Re-queries the registry for every cached service name, concurrently.
    ///
    /// Names whose refresh is already in flight are skipped.
    pub async fn refresh_all(&self) {
        let entries: Vec<(String, Arc<ServiceEntry>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();

        futures_util::future::join_all(
            entries
                .iter()
                .map(|(service, entry)| self.refresh_in_background(service, entry)),
        )
        .await;
    }

    /// Spawns a task refreshing every cached name each TTL/2.
    ///
    /// Each round runs in its own task so a slow registry never delays the next
    /// tick. The task stops once the balancer is dropped.
    pub fn spawn_refresher(self: &Arc<Self>) -> JoinHandle<()> {
        let balancer: Weak<Self> = Arc::downgrade(self);
        let period = (self.ttl / 2).max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(balancer) = balancer.upgrade() else {
                    break;
                };
                tokio::spawn(async move { balancer.refresh_all().await });
            }
        })
    }

    /// Returns the cached state of `service`, if it was ever resolved.
    pub async fn snapshot(&self, service: &str) -> Option<CacheSnapshot> {
        let entry = self.entries.read().await.get(service).cloned()?;
        let cache = entry.cache.lock().await;
        Some(CacheSnapshot {
            instances: cache.instances.as_ref().clone(),
            degraded: cache.degraded,
            fresh: cache.expires_at.is_some_and(|at| Instant::now() < at),
        })
    }

    async fn entry(&self, service: &str) -> Arc<ServiceEntry> {
        if let Some(entry) = self.entries.read().await.get(service) {
            return entry.clone();
        }
        self.entries
            .write()
            .await
            .entry(service.to_string())
            .or_default()
            .clone()
    }

    async fn refresh_in_background(&self, service: &str, entry: &ServiceEntry) {
        if entry.refreshing.swap(true, Ordering::AcqRel) {
            tracing::debug!(service = %service, "refresh already in flight");
            return;
        }
        let _guard = RefreshGuard(&entry.refreshing);

        let answer = self.query(service).await;
        let mut cache = entry.cache.lock().await;
        if let Err(e) = self.apply(service, &mut cache, answer) {
            tracing::debug!(service = %service, error = %e, "background refresh failed");
        }
    }

    async fn refresh_locked(&self, service: &str, cache: &mut CacheState) -> Result<()> {
        let answer = self.query(service).await;
        self.apply(service, cache, answer)
    }

    async fn query(&self, service: &str) -> Result<Vec<ServiceInstance>> {
        metrics::counter!("balancer_registry_queries_total", "service" => service.to_string())
            .increment(1);
        self.registry.healthy_instances(service).await
    }

    fn apply(
        &self,
        service: &str,
        cache: &mut CacheState,
        answer: Result<Vec<ServiceInstance>>,
    ) -> Result<()> {
        match answer {
            Ok(instances) => {
                if cache.degraded {
                    tracing::info!(service = %service, "registry recovered");
                }
                tracing::debug!(service = %service, count = instances.len(), "instance cache refreshed");
                cache.instances = Arc::new(instances);
                cache.expires_at = Some(Instant::now() + self.ttl);
                cache.degraded = false;
                Ok(())
            }
            Err(e) if cache.expires_at.is_some() => {
                tracing::warn!(
                    service = %service,
                    error = %e,
                    cached = cache.instances.len(),
                    "registry query failed, serving stale instances"
                );
                metrics::counter!("balancer_stale_served_total", "service" => service.to_string())
                    .increment(1);
                // Back off a full TTL before asking the failing registry again.
                cache.expires_at = Some(Instant::now() + self.ttl);
                cache.degraded = true;
                Ok(())
            }
            Err(e) => Err(DiscoveryError::RegistryUnavailable {
                service: service.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
