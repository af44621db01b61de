//! Gateway entry point.

use std::sync::Arc;

use common::ProcessEnv;
use common::telemetry::{init_tracing, install_metrics_recorder};
use discovery::{ConsulRegistry, LoadBalancer};
use gateway::config::Config;
use gateway::proxy::{ProxyState, RouteTable};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing
    init_tracing();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = install_metrics_recorder()?;

    // 3. Load configuration; missing values are fatal
    let config = Config::from_env(&ProcessEnv).inspect_err(|e| {
        tracing::error!(error = %e, "invalid configuration");
    })?;

    // 4. Build the balancer and keep its cache warm in the background
    let registry = ConsulRegistry::new(&config.registry_addr)?;
    let balancer = Arc::new(LoadBalancer::with_ttl(registry, config.cache_ttl));
    let refresher = balancer.spawn_refresher();

    let state = Arc::new(ProxyState::new(
        balancer,
        RouteTable::default(),
        config.upstream_timeout,
    )?);
    let app = gateway::create_app(state, metrics_handle);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, registry = %config.registry_addr, "starting API gateway");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(common::shutdown_signal())
        .await?;

    refresher.abort();
    tracing::info!("server shut down gracefully");
    Ok(())
}
