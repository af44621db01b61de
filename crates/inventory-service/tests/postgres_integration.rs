//! PostgreSQL inventory store integration tests
//!
//! These tests use a shared PostgreSQL container and need a Docker daemon.
//! Run with:
//!
//! ```bash
//! cargo test -p inventory-service --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use inventory_service::error::InventoryError;
use inventory_service::model::ReservationStatus;
use inventory_service::store::{InventoryStore, PostgresInventoryStore};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresInventoryStore {
    let info = get_container_info().await;
    let pool = PgPool::connect(&info.connection_string).await.unwrap();
    let store = PostgresInventoryStore::new(pool);
    store.run_migrations().await.unwrap();

    sqlx::query("TRUNCATE TABLE inventory_reservations, inventory")
        .execute(store.pool())
        .await
        .unwrap();

    store
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn test_create_get_and_conflict() {
    let store = get_test_store().await;
    let item = store.create("A", 5).await.unwrap();
    assert_eq!((item.quantity, item.reserved), (5, 0));

    assert!(matches!(
        store.create("A", 9).await,
        Err(InventoryError::AlreadyExists(_))
    ));
    assert_eq!(store.get("A").await.unwrap().unwrap().quantity, 5);
    assert!(store.get("B").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn test_reserve_release_bounds() {
    let store = get_test_store().await;
    store.create("A", 3).await.unwrap();

    assert!(matches!(
        store.reserve("A", 4).await,
        Err(InventoryError::InsufficientStock { available: 3, .. })
    ));
    assert!(matches!(
        store.reserve("missing", 1).await,
        Err(InventoryError::NotFound(_))
    ));

    store.reserve("A", 2).await.unwrap();
    assert!(matches!(
        store.release("A", 3).await,
        Err(InventoryError::InsufficientReserved { reserved: 2, .. })
    ));
    let item = store.release("A", 2).await.unwrap();
    assert_eq!((item.quantity, item.reserved), (3, 0));
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn test_concurrent_reserves_exactly_enough_succeed() {
    let store = Arc::new(get_test_store().await);
    store.create("A", 10).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..30 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.reserve("A", 1).await }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(InventoryError::InsufficientStock { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 10);
    let item = store.get("A").await.unwrap().unwrap();
    assert_eq!((item.quantity, item.reserved), (0, 10));
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn test_order_ledger_is_idempotent() {
    let store = get_test_store().await;
    store.create("A", 10).await.unwrap();

    assert!(store.reserve_for_order(1, "A", 4).await.unwrap().is_some());
    assert!(store.reserve_for_order(1, "A", 4).await.unwrap().is_none());
    assert_eq!(store.get("A").await.unwrap().unwrap().reserved, 4);

    assert!(store.release_for_order(1, "A").await.unwrap().is_some());
    assert!(store.release_for_order(1, "A").await.unwrap().is_none());
    assert!(store.release_for_order(2, "A").await.unwrap().is_none());

    let item = store.get("A").await.unwrap().unwrap();
    assert_eq!((item.quantity, item.reserved), (10, 0));
    assert_eq!(
        store.reservation(1).await.unwrap().unwrap().status,
        ReservationStatus::Released
    );
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn test_failed_order_reservation_rolls_back_ledger() {
    let store = get_test_store().await;
    store.create("A", 1).await.unwrap();

    assert!(matches!(
        store.reserve_for_order(5, "A", 2).await,
        Err(InventoryError::InsufficientStock { .. })
    ));
    assert!(store.reservation(5).await.unwrap().is_none());
    assert!(matches!(
        store.reserve_for_order(6, "missing", 1).await,
        Err(InventoryError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn test_cancellation_before_reservation_blocks_it() {
    let store = get_test_store().await;
    store.create("A", 5).await.unwrap();

    assert!(store.release_for_order(7, "A").await.unwrap().is_none());
    let tombstone = store.reservation(7).await.unwrap().unwrap();
    assert_eq!(tombstone.status, ReservationStatus::Cancelled);
    assert_eq!(tombstone.quantity, 0);

    assert!(store.reserve_for_order(7, "A", 2).await.unwrap().is_none());
    let item = store.get("A").await.unwrap().unwrap();
    assert_eq!((item.quantity, item.reserved), (5, 0));
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn test_release_past_i32_max_is_refused() {
    let store = get_test_store().await;
    store.create("A", 5).await.unwrap();
    store.reserve("A", 2).await.unwrap();
    store.set_quantity("A", i32::MAX).await.unwrap();

    assert!(matches!(
        store.release("A", 2).await,
        Err(InventoryError::Overflow(_))
    ));
    let item = store.get("A").await.unwrap().unwrap();
    assert_eq!((item.quantity, item.reserved), (i32::MAX, 2));
}
