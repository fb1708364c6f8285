//! # Consul HTTP Client Tests
//!
//! Exercises the Consul health and KV clients against a mock agent served
//! by axum: body parsing, metadata extraction, index-header handling, and
//! error surfacing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;

use consul_balancer::{ConsulKv, ConsulRegistry, Registry};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock agent");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn health_handler(Path(service): Path<String>) -> impl IntoResponse {
    assert_eq!(service, "backend");
    let body = json!([
        {
            "Service": {
                "Address": "10.0.0.1",
                "Port": 8080,
                "Meta": {"zone": "us-east-1a", "balanceFactor": "150"}
            }
        },
        {
            "Service": {
                "Address": "10.0.0.2",
                "Port": 8081,
                "Meta": {"balanceFactor": "not-a-number"}
            }
        }
    ]);
    ([("X-Consul-Index", "42")], Json(body))
}

#[tokio::test]
async fn test_health_query_parses_instances_and_index() {
    let addr = serve(Router::new().route("/v1/health/service/:service", get(health_handler))).await;
    let registry = ConsulRegistry::new(&addr.to_string()).unwrap();

    let (instances, index) = registry.healthy_instances("backend", 0).await.unwrap();
    assert_eq!(index, 42);
    assert_eq!(instances.len(), 2);

    assert_eq!(instances[0].address, "10.0.0.1");
    assert_eq!(instances[0].port, 8080);
    assert_eq!(instances[0].zone(), "us-east-1a");
    assert_eq!(instances[0].balance_factor(), Some(150));

    // Unparseable weight reads as absent; missing zone reads as unknown.
    assert_eq!(instances[1].balance_factor(), None);
    assert_eq!(instances[1].zone(), "unknown");
}

#[tokio::test]
async fn test_missing_index_header_keeps_last_index() {
    async fn handler() -> impl IntoResponse {
        Json(json!([]))
    }
    let addr = serve(Router::new().route("/v1/health/service/:service", get(handler))).await;
    let registry = ConsulRegistry::new(&addr.to_string()).unwrap();

    let (instances, index) = registry.healthy_instances("backend", 7).await.unwrap();
    assert!(instances.is_empty());
    assert_eq!(index, 7);
}

#[tokio::test]
async fn test_error_status_surfaces_as_registry_error() {
    async fn handler() -> impl IntoResponse {
        StatusCode::INTERNAL_SERVER_ERROR
    }
    let addr = serve(Router::new().route("/v1/health/service/:service", get(handler))).await;
    let registry = ConsulRegistry::new(&addr.to_string()).unwrap();

    let err = registry.healthy_instances("backend", 0).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("500"));
}

type KvStore = Arc<Mutex<HashMap<String, Vec<u8>>>>;

async fn kv_get(State(store): State<KvStore>, Path(key): Path<String>) -> impl IntoResponse {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    match store.lock().get(&key) {
        None => StatusCode::NOT_FOUND.into_response(),
        Some(value) => Json(json!([{"Key": key, "Value": STANDARD.encode(value)}])).into_response(),
    }
}

async fn kv_put(
    State(store): State<KvStore>,
    Path(key): Path<String>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    store.lock().insert(key, body.to_vec());
    Json(json!(true))
}

#[tokio::test]
async fn test_kv_round_trip() {
    let store: KvStore = Arc::new(Mutex::new(HashMap::new()));
    let app = Router::new()
        .route("/v1/kv/*key", get(kv_get).put(kv_put))
        .with_state(store);
    let addr = serve(app).await;

    let kv = ConsulKv::new(&addr.to_string()).unwrap();
    assert_eq!(kv.get("missing").await.unwrap(), None);

    kv.put("config/ratio", b"0.7".to_vec()).await.unwrap();
    assert_eq!(kv.get("config/ratio").await.unwrap(), Some(b"0.7".to_vec()));
}
