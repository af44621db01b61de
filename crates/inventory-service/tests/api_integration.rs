//! HTTP-level tests for the inventory API over in-memory store and bus.

use std::sync::{Arc, OnceLock};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_bus::{EventType, INVENTORY_EVENTS_TOPIC, InMemoryEventBus};
use inventory_service::routes::inventory::AppState;
use inventory_service::service::InventoryService;
use inventory_service::store::InMemoryInventoryStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (Router, InMemoryEventBus) {
    let bus = InMemoryEventBus::new();
    let service = Arc::new(InventoryService::new(
        InMemoryInventoryStore::new(),
        Arc::new(bus.clone()),
        INVENTORY_EVENTS_TOPIC,
    ));
    let app = inventory_service::create_app(Arc::new(AppState { service }), get_metrics_handle());
    (app, bus)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();
    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_create_and_get_inventory() {
    let (app, bus) = setup();
    let (status, json) = send(
        &app,
        json_request("POST", "/inventory", serde_json::json!({ "jar_id": "A", "quantity": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["quantity"], 10);
    assert_eq!(json["reserved"], 0);

    let (status, json) = send(&app, get("/inventory/A")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["jar_id"], "A");

    let events = bus.events(INVENTORY_EVENTS_TOPIC);
    assert_eq!(events[0].kind(), Ok(EventType::InventoryCreated));
}

#[tokio::test]
async fn test_create_duplicate_is_conflict() {
    let (app, _) = setup();
    let body = serde_json::json!({ "jar_id": "A", "quantity": 1 });
    send(&app, json_request("POST", "/inventory", body.clone())).await;

    let (status, json) = send(&app, json_request("POST", "/inventory", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn test_create_validation_error() {
    let (app, _) = setup();
    let (status, _) = send(
        &app,
        json_request("POST", "/inventory", serde_json::json!({ "jar_id": "", "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request("POST", "/inventory", serde_json::json!({ "jar_id": "A", "quantity": -4 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_inventory() {
    let (app, bus) = setup();
    send(
        &app,
        json_request("POST", "/inventory", serde_json::json!({ "jar_id": "A", "quantity": 1 })),
    )
    .await;

    let (status, json) = send(
        &app,
        json_request("PUT", "/inventory/A", serde_json::json!({ "quantity": 42 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["quantity"], 42);
    assert_eq!(
        bus.events(INVENTORY_EVENTS_TOPIC)[1].kind(),
        Ok(EventType::InventoryUpdated)
    );
}

#[tokio::test]
async fn test_unknown_jar_is_not_found() {
    let (app, _) = setup();
    let (status, _) = send(&app, get("/inventory/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        json_request("PUT", "/inventory/nope", serde_json::json!({ "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
