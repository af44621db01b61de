//! Service discovery for the gateway and the saga participants.
//!
//! [`ServiceRegistry`] abstracts the health-checking registry (Consul in
//! production, [`InMemoryRegistry`] in tests). [`LoadBalancer`] sits on top of it,
//! caching healthy instances per logical name and handing them out round-robin.

pub mod balancer;
pub mod consul;
pub mod error;
pub mod instance;
pub mod registry;

pub use balancer::{CacheSnapshot, DEFAULT_CACHE_TTL, LoadBalancer};
pub use consul::ConsulRegistry;
pub use error::{DiscoveryError, Result};
pub use instance::{Registration, ServiceInstance};
pub use registry::{InMemoryRegistry, ServiceRegistry};
