//! End-to-end tests for the users API over the in-memory backend

use std::sync::Arc;
use std::time::Duration;

use agegate_server::db::{ConnectionStatus, FailureSignal};
use agegate_server::http::{build_router, AppState, ServerConfig};
use agegate_server::models::NewUser;
use agegate_server::{ensure_schema, ConnectionManager, MemoryConnector};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn setup() -> (Router, Arc<AppState>, MemoryConnector) {
    init_tracing();
    let connector = MemoryConnector::new();
    let db = ConnectionManager::new(connector.clone());
    let store = db.connect().await.unwrap();
    ensure_schema(store.as_ref()).await.unwrap();

    let state = Arc::new(AppState::new(db));
    let router = build_router(Arc::clone(&state), &ServerConfig::default());
    (router, state, connector)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn people() -> Vec<NewUser> {
    [
        ("John", 30),
        ("Jane", 25),
        ("Bob", 35),
        ("Alice", 19),
        ("Charlie", 21),
        ("David", 22),
        ("Emily", 28),
        ("Frank", 42),
        ("Grace", 31),
        ("Henry", 20),
    ]
    .into_iter()
    .map(|(name, age)| NewUser::new(name, format!("{}@example.com", name.to_lowercase()), age))
    .collect()
}

#[tokio::test]
async fn seeded_collection_hides_young_users() {
    let (router, state, _) = setup().await;
    let seeded = state.users.seed(people()).await.unwrap();

    let (status, body) = get(&router, "/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 7);
    assert_eq!(body["totalCount"], 7);

    let ages: Vec<i64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["age"].as_i64().unwrap())
        .collect();
    assert_eq!(ages, vec![22, 25, 28, 30, 31, 35, 42]);

    for user in &seeded {
        let (status, _) = get(&router, &format!("/users/{}", user.id)).await;
        let expected = if user.age > 21 {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        };
        assert_eq!(status, expected, "{} ({})", user.name, user.age);
    }
}

#[tokio::test]
async fn min_age_below_threshold_exposes_younger_users() {
    let (router, state, _) = setup().await;
    state.users.seed(people()).await.unwrap();

    let (status, body) = get(&router, "/users?minAge=18&limit=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    assert_eq!(body["totalCount"], 10);
    assert_eq!(body["data"][0]["name"], "Alice");
}

#[tokio::test(start_paused = true)]
async fn api_recovers_after_connection_loss() {
    let (router, state, connector) = setup().await;
    let david = state
        .users
        .insert(NewUser::new("David", "david@example.com", 22))
        .await
        .unwrap();

    connector.emit(FailureSignal::ConnectionClosed);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(state.db.status(), ConnectionStatus::Reconnecting);

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");

    // First retry fires after the 1s base delay
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(state.db.status(), ConnectionStatus::Connected);
    assert_eq!(connector.connect_attempts(), 2);

    let (status, _) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&router, &format!("/users/{}", david.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "david@example.com");
}

#[tokio::test]
async fn health_after_shutdown_is_degraded() {
    let (router, state, _) = setup().await;
    state.db.close().await.unwrap();

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["database"]["connected"], false);
}
