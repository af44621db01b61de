//! ConsulRegistry against a local stand-in for the Consul agent HTTP API.

use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use discovery::{
    ConsulRegistry, DiscoveryError, LoadBalancer, Registration, ServiceRegistry,
};
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct FakeAgent {
    registered: Arc<Mutex<Vec<Value>>>,
    deregistered: Arc<Mutex<Vec<String>>>,
}

async fn health(
    Path(name): Path<String>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Json<Value> {
    assert_eq!(params.get("passing").map(String::as_str), Some("true"));
    if name != "order-service" {
        return Json(json!([]));
    }
    Json(json!([
        {
            "Node": { "Node": "node-1", "Address": "10.1.0.1" },
            "Service": { "ID": "order-1", "Service": "order-service", "Address": "10.0.0.1", "Port": 8081 },
            "Checks": []
        },
        {
            "Node": { "Node": "node-2", "Address": "10.1.0.2" },
            "Service": { "ID": "order-2", "Service": "order-service", "Address": "", "Port": 8081 },
            "Checks": []
        }
    ]))
}

async fn register(State(agent): State<FakeAgent>, Json(body): Json<Value>) {
    agent.registered.lock().unwrap().push(body);
}

async fn deregister(State(agent): State<FakeAgent>, Path(id): Path<String>) {
    agent.deregistered.lock().unwrap().push(id);
}

async fn start_agent() -> (FakeAgent, String) {
    let agent = FakeAgent::default();
    let app = Router::new()
        .route("/v1/health/service/{name}", get(health))
        .route("/v1/agent/service/register", put(register))
        .route("/v1/agent/service/deregister/{id}", put(deregister))
        .with_state(agent.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (agent, addr.to_string())
}

#[tokio::test]
async fn test_healthy_instances_from_agent() {
    let (_agent, addr) = start_agent().await;
    let registry = ConsulRegistry::new(&addr).unwrap();

    let instances = registry.healthy_instances("order-service").await.unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].base_url(), "http://10.0.0.1:8081");
    assert_eq!(instances[1].base_url(), "http://10.1.0.2:8081");

    assert!(registry.healthy_instances("user-service").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_register_and_deregister() {
    let (agent, addr) = start_agent().await;
    let registry = ConsulRegistry::new(&format!("http://{addr}")).unwrap();

    registry
        .register(&Registration {
            id: "inventory-service-a-8082".to_string(),
            name: "inventory-service".to_string(),
            address: "inventory".to_string(),
            port: 8082,
            health_url: "http://inventory:8082/health".to_string(),
        })
        .await
        .unwrap();
    registry.deregister("inventory-service-a-8082").await.unwrap();

    let registered = agent.registered.lock().unwrap().clone();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0]["Name"], "inventory-service");
    assert_eq!(registered[0]["Check"]["DeregisterCriticalServiceAfter"], "30s");
    assert_eq!(
        agent.deregistered.lock().unwrap().as_slice(),
        ["inventory-service-a-8082".to_string()]
    );
}

#[tokio::test]
async fn test_balancer_over_consul_round_robins() {
    let (_agent, addr) = start_agent().await;
    let balancer = LoadBalancer::new(ConsulRegistry::new(&addr).unwrap());

    let first = balancer.resolve_url("order-service").await.unwrap();
    let second = balancer.resolve_url("order-service").await.unwrap();
    let third = balancer.resolve_url("order-service").await.unwrap();
    assert_eq!(first, "http://10.0.0.1:8081");
    assert_eq!(second, "http://10.1.0.2:8081");
    assert_eq!(third, first);

    let err = balancer.resolve("user-service").await.unwrap_err();
    assert_eq!(err, DiscoveryError::NoHealthyInstance("user-service".to_string()));
}

#[tokio::test]
async fn test_unreachable_agent_is_registry_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let balancer = LoadBalancer::new(ConsulRegistry::new(&addr.to_string()).unwrap());
    let err = balancer.resolve("order-service").await.unwrap_err();
    assert!(matches!(err, DiscoveryError::RegistryUnavailable { .. }));
}
