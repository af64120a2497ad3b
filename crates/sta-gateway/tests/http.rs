//! HTTP tests for the gateway router, backed by the scripted store.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sta_core::testing::{row, Answer, ScriptedStore};
use sta_core::SqlParam;
use sta_gateway::{create_router, AppState, GatewayConfig};

fn server(store: &ScriptedStore) -> TestServer {
    let state = AppState::new(Arc::new(store.clone()), GatewayConfig::default());
    TestServer::new(create_router(state)).unwrap()
}

#[tokio::test]
async fn test_service_root() {
    let server = server(&ScriptedStore::new());
    let response = server.get("/v1.1").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["value"].as_array().unwrap().len(), 8);
    assert_eq!(
        body["value"][7],
        json!({ "name": "Things", "url": "http://localhost:8018/v1.1/Things" })
    );
    assert!(body["serverSettings"]["conformance"].is_array());
}

#[tokio::test]
async fn test_streams_collection() {
    let store = ScriptedStore::new();
    store.on(
        "\"Thing\" AS t0",
        Answer::Rows(vec![
            row(1, json!({ "name": "a" })),
            row(2, json!({ "name": "b" })),
        ]),
    );
    let server = server(&store);
    let response = server.get("/v1.1/Things?$select=id,name&$top=1").await;
    response.assert_status_ok();
    assert_eq!(
        response.header("content-type").to_str().unwrap(),
        "application/json"
    );
    let body: Value = response.json();
    assert_eq!(
        body,
        json!({
            "value": [{ "@iot.id": 1, "name": "a" }],
            "@iot.nextLink": "http://localhost:8018/v1.1/Things?$select=id%2Cname&$top=1&$skip=1"
        })
    );
}

#[tokio::test]
async fn test_error_envelope() {
    let server = server(&ScriptedStore::new());

    let response = server.get("/v1.1/Things(1)").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(
        response.json::<Value>(),
        json!({ "code": 404, "type": "error", "message": "Not Found" })
    );

    let response = server.get("/v1.1/Things?$filter=name%20eq").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], 400);
    assert_eq!(body["type"], "error");

    let response = server.get("/v1.1/Unicorns").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_encoded_percent_in_key() {
    let store = ScriptedStore::new();
    store.on("\"Thing\" AS t0", Answer::Rows(vec![row(7, json!({ "name": "odd" }))]));
    let response = server(&store).get("/v1.1/Things('a%2525b')").await;
    response.assert_status_ok();
    let fetches = store.fetches();
    assert_eq!(fetches[0].params, vec![SqlParam::Text("a%25b".to_string())]);
}

#[tokio::test]
async fn test_store_outage() {
    let store = ScriptedStore::new();
    store.on("\"Sensor\"", Answer::Unavailable);
    let response = server(&store).get("/v1.1/Sensors").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], 503);
}

#[tokio::test]
async fn test_property_value() {
    let store = ScriptedStore::new();
    store.on("\"Thing\" AS t0", Answer::Rows(vec![row(1, json!({ "name": "boiler" }))]));
    let response = server(&store).get("/v1.1/Things(1)/name/$value").await;
    response.assert_status_ok();
    assert_eq!(
        response.header("content-type").to_str().unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.text(), "boiler");
}

#[tokio::test]
async fn test_health() {
    let store = ScriptedStore::new();
    let server = server(&store);
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "healthy");

    store.set_healthy(false);
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database_connected"], false);
}
