// ABOUTME: Route tests for the sharding proxy against in-memory shards
// ABOUTME: Exercises status codes and JSON bodies for every endpoint

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use shard_ring::{MemoryConnector, RouterConfig, ShardRouter};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup(shards: &[&str]) -> (Router, Arc<ShardRouter>, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::new());
    for name in shards {
        connector.shard(name);
    }
    setup_with(connector, shards).await
}

async fn setup_with(
    connector: Arc<MemoryConnector>,
    shards: &[&str],
) -> (Router, Arc<ShardRouter>, Arc<MemoryConnector>) {
    let config = RouterConfig::default()
        .with_probe_attempts(2)
        .with_probe_interval(Duration::from_millis(10))
        .with_operation_timeout(Duration::from_millis(100))
        .with_stats_timeout(Duration::from_millis(100));

    let router = Arc::new(
        ShardRouter::start(config, connector.clone(), shards.iter().copied())
            .await
            .unwrap(),
    );
    assert!(router.wait_until_settled(Duration::from_secs(2)).await);

    (shard_proxy::routes(router.clone()), router, connector)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_write_then_read() {
    let (app, router, _) = setup(&["s0", "s1", "s2"]).await;

    let (status, written) =
        send_json(&app, post_json("/write", json!({"key": "user_1", "value": "alice"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(written["message"], "Write successful");
    assert_eq!(written["data"], json!({"key": "user_1", "value": "alice"}));

    let owner = router.locate("user_1").await.unwrap();
    assert_eq!(written["shard"], owner.as_str());

    let (status, read) = send_json(&app, get("/read?key=user_1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["message"], "Read successful");
    assert_eq!(read["shard"], owner.as_str());
    assert_eq!(read["data"]["key"], "user_1");
    assert_eq!(read["data"]["value"], "alice");
    assert!(read["data"]["created_at"].is_string());
}

#[tokio::test]
async fn test_write_rejects_bad_input() {
    let (app, _, _) = setup(&["s0"]).await;

    let (status, body) =
        send_json(&app, post_json("/write", json!({"key": "", "value": "v"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let request = Request::builder()
        .method("POST")
        .uri("/write")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON"));
}

#[tokio::test]
async fn test_write_requires_post() {
    let (app, _, _) = setup(&["s0"]).await;

    let (status, _) = send(&app, get("/write")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_read_missing_key_is_404() {
    let (app, _, _) = setup(&["s0", "s1"]).await;

    let (status, body) = send_json(&app, get("/read?key=missing_key")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Key not found");
}

#[tokio::test]
async fn test_read_without_key_is_400() {
    let (app, _, _) = setup(&["s0"]).await;

    let (status, _) = send_json(&app, get("/read")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_down_shard_is_503_and_down_in_stats() {
    let connector = Arc::new(MemoryConnector::new());
    connector.shard("s1").set_reachable(false);
    let (app, router, _) = setup_with(connector, &["s0", "s1", "s2"]).await;

    let mut key_on_s1 = None;
    for i in 0..10_000 {
        let key = format!("user_{}", i);
        if router.locate(&key).await.unwrap() == "s1" {
            key_on_s1 = Some(key);
            break;
        }
    }
    let key = key_on_s1.unwrap();

    let (status, body) =
        send_json(&app, post_json("/write", json!({"key": key, "value": "v"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("s1"));

    let (status, stats) = send_json(&app, get("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        stats["shards"],
        json!({"s0": "up", "s1": "down", "s2": "up"})
    );
    assert_eq!(stats["status"]["s1"], "degraded");
    assert_eq!(stats["total_shards"], 3);
    assert_eq!(stats["algorithm"], "consistent_hashing");
}

#[tokio::test]
async fn test_health_reflects_liveness() {
    let (app, router, _) = setup(&["s0"]).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");

    router.shutdown().await;

    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_shard_membership_endpoints() {
    let (app, _, connector) = setup(&["s0", "s1"]).await;

    let (status, body) = send_json(&app, post_json("/shards", json!({"name": "s2"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"shard": "s2", "changed": true, "total_shards": 3}));

    let (status, body) = send_json(&app, post_json("/shards", json!({"name": "s2"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);

    let (status, body) = send_json(&app, get("/shards")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["s0", "s1", "s2"]));

    let request = Request::builder()
        .method("DELETE")
        .uri("/shards/s0")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"shard": "s0", "changed": true, "total_shards": 2}));
    assert!(connector.shard("s0").is_closed());

    let (status, _) = send_json(&app, post_json("/shards", json!({"name": "bad name"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
