//! Payment service entry point.

use std::sync::Arc;

use common::ProcessEnv;
use common::telemetry::{init_tracing, install_metrics_recorder};
use discovery::{ConsulRegistry, Registration, ServiceRegistry};
use event_bus::{Consumer, ORDER_EVENTS_TOPIC, RetryPolicy};
use payment_service::config::Config;
use payment_service::events::{CONSUMER_GROUP, OrderEventHandler};
use payment_service::routes::payments::AppState;
use payment_service::service::PaymentService;
use payment_service::settlement::{RandomDecider, SettlementPool};
use payment_service::store::PostgresPaymentStore;

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
    let service_config = &config.service;

    // 4. Connect to the datastore and apply migrations
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&service_config.database_url)
        .await?;
    let store = Arc::new(PostgresPaymentStore::new(pool));
    store.run_migrations().await?;

    // 5. Start settlement and pick up payments a previous run left pending
    let bus = event_bus::connect(&service_config.bus_brokers).await?;
    let settlement = SettlementPool::start(
        store.clone(),
        bus.clone(),
        service_config.bus_topic.clone(),
        Arc::new(RandomDecider::new(config.success_rate)),
        config.settlement.clone(),
    );
    let service = Arc::new(PaymentService::new(
        store,
        settlement.queue(),
        config.mock_amount,
    ));
    service.recover_pending().await?;

    // 6. Consume order events
    let consumer = Consumer::new(
        bus,
        ORDER_EVENTS_TOPIC,
        CONSUMER_GROUP,
        Arc::new(OrderEventHandler::new(service.clone())),
    )
    .with_retry_policy(
        RetryPolicy::default().with_max_attempts(service_config.consumer_max_attempts),
    )
    .spawn();

    // 7. Register with the service registry
    let registry = ConsulRegistry::new(&service_config.registry_addr)?;
    registry
        .register(&Registration {
            id: service_config.service_id.clone(),
            name: service_config.service_name.clone(),
            address: service_config.advertise_host.clone(),
            port: service_config.port,
            health_url: service_config.health_url(),
        })
        .await?;

    // 8. Start server
    let app = payment_service::create_app(Arc::new(AppState { service }), metrics_handle);
    let addr = service_config.addr();
    tracing::info!(%addr, topic = %service_config.bus_topic, "starting payment service");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(common::shutdown_signal())
        .await;

    // 9. Leave the registry before exiting
    consumer.abort();
    settlement.shutdown();
    if let Err(e) = registry.deregister(&service_config.service_id).await {
        tracing::warn!(error = %e, "failed to deregister");
    }
    served?;

    tracing::info!("server shut down gracefully");
    Ok(())
}
