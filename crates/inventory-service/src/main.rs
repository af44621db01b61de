//! Inventory service entry point.

use std::sync::Arc;

use common::telemetry::{init_tracing, install_metrics_recorder};
use common::{ProcessEnv, ServiceConfig};
use discovery::{ConsulRegistry, Registration, ServiceRegistry};
use event_bus::{Consumer, INVENTORY_EVENTS_TOPIC, ORDER_EVENTS_TOPIC, RetryPolicy};
use inventory_service::events::{CONSUMER_GROUP, OrderEventHandler};
use inventory_service::routes::inventory::AppState;
use inventory_service::service::InventoryService;
use inventory_service::store::PostgresInventoryStore;

const SERVICE_NAME: &str = "inventory-service";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing
    init_tracing();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = install_metrics_recorder()?;

    // 3. Load configuration; missing values are fatal
    let config = ServiceConfig::from_env(SERVICE_NAME, &ProcessEnv)
        .and_then(|config| config.require_topic(INVENTORY_EVENTS_TOPIC).map(|()| config))
        .inspect_err(|e| {
            tracing::error!(error = %e, "invalid configuration");
        })?;

    // 4. Connect to the datastore and apply migrations
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = PostgresInventoryStore::new(pool);
    store.run_migrations().await?;

    // 5. Connect to the bus and start consuming order events
    let bus = event_bus::connect(&config.bus_brokers).await?;
    let service = Arc::new(InventoryService::new(store, bus.clone(), config.bus_topic.clone()));
    let consumer = Consumer::new(
        bus,
        ORDER_EVENTS_TOPIC,
        CONSUMER_GROUP,
        Arc::new(OrderEventHandler::new(service.clone())),
    )
    .with_retry_policy(RetryPolicy::default().with_max_attempts(config.consumer_max_attempts))
    .spawn();

    // 6. Register with the service registry
    let registry = ConsulRegistry::new(&config.registry_addr)?;
    registry
        .register(&Registration {
            id: config.service_id.clone(),
            name: config.service_name.clone(),
            address: config.advertise_host.clone(),
            port: config.port,
            health_url: config.health_url(),
        })
        .await?;

    // 7. Start server
    let app = inventory_service::create_app(Arc::new(AppState { service }), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, topic = %config.bus_topic, "starting inventory service");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(common::shutdown_signal())
        .await;

    // 8. Leave the registry before exiting
    consumer.abort();
    if let Err(e) = registry.deregister(&config.service_id).await {
        tracing::warn!(error = %e, "failed to deregister");
    }
    served?;

    tracing::info!("server shut down gracefully");
    Ok(())
}
