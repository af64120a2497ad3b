//! End-to-end engine tests against the scripted store.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sta_core::testing::{child_row, count_only_row, row, Answer, ScriptedStore};
use sta_core::{CountMode, Engine, EngineConfig, Error, SqlParam};

fn engine(store: &ScriptedStore, config: EngineConfig) -> Engine {
    Engine::new(Arc::new(store.clone()), config)
}

async fn get_json(engine: &Engine, path: &str, query: &str) -> Value {
    let response = engine.execute(path, query).await.unwrap();
    let body = response.collect().await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn observations() -> Vec<sta_core::Row> {
    (1..=5)
        .map(|i| {
            row(
                100 + i,
                json!({
                    "phenomenonTime": format!("2024-01-0{}T00:00:00.000Z", i),
                    "result": 10 + i,
                }),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_filtered_navigation_page() {
    let store = ScriptedStore::new();
    store.on("\"Observation\" AS t0", Answer::Rows(observations()));
    let engine = engine(&store, EngineConfig::default());

    let doc = get_json(
        &engine,
        "/Datastreams(3)/Observations",
        "$filter=result%20gt%2010&$top=2&$orderby=phenomenonTime%20asc",
    )
    .await;

    let values = doc["value"].as_array().unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["@iot.id"], 101);
    assert_eq!(values[0]["phenomenonTime"], "2024-01-01T00:00:00.000Z");
    assert_eq!(values[1]["@iot.id"], 102);
    assert_eq!(
        values[0]["@iot.selfLink"],
        "http://localhost:8018/v1.1/Observations(101)"
    );
    assert_eq!(
        values[0]["Datastream@iot.navigationLink"],
        "http://localhost:8018/v1.1/Observations(101)/Datastream"
    );
    assert_eq!(
        doc["@iot.nextLink"],
        "http://localhost:8018/v1.1/Datastreams(3)/Observations?$filter=result%20gt%2010&$orderby=phenomenonTime%20asc&$top=2&$skip=2"
    );

    let fetches = store.fetches();
    assert_eq!(fetches.len(), 1);
    let sql = &fetches[0].sql;
    assert!(sql.contains("t0.\"resultNumber\" > $2"));
    assert!(sql.contains("ORDER BY t0.\"phenomenonTime\" ASC, t0.\"id\" ASC"));
    assert_eq!(
        fetches[0].params,
        vec![
            SqlParam::Int(3),
            SqlParam::Int(10),
            SqlParam::Int(3),
            SqlParam::Int(0)
        ]
    );
}

#[tokio::test]
async fn test_following_next_link() {
    let store = ScriptedStore::new();
    store.on(
        "\"Observation\" AS t0",
        Answer::Rows(observations().into_iter().skip(2).collect()),
    );
    let engine = engine(&store, EngineConfig::default());

    let doc = get_json(
        &engine,
        "/Datastreams(3)/Observations",
        "$filter=result%20gt%2010&$orderby=phenomenonTime%20asc&$top=2&$skip=2",
    )
    .await;
    assert_eq!(doc["value"][0]["@iot.id"], 103);
    assert!(doc["@iot.nextLink"].as_str().unwrap().ends_with("$top=2&$skip=4"));
    // offset is the last bound parameter
    assert_eq!(
        store.fetches()[0].params.last(),
        Some(&SqlParam::Int(2))
    );
}

#[tokio::test]
async fn test_last_page_has_no_next_link() {
    let store = ScriptedStore::new();
    store.on("\"Observation\" AS t0", Answer::Rows(observations()));
    let doc = get_json(
        &engine(&store, EngineConfig::default()),
        "/Observations",
        "$top=5",
    )
    .await;
    assert_eq!(doc["value"].as_array().unwrap().len(), 5);
    assert!(doc.get("@iot.nextLink").is_none());
}

#[tokio::test]
async fn test_count_modes() {
    let store = ScriptedStore::new();
    store.on("\"Observation\" AS t0", Answer::Rows(observations()));
    store.on("LIMIT 11", Answer::Scalar(11));
    store.on("SELECT COUNT(*)", Answer::Scalar(5));
    store.on("SELECT 1 FROM", Answer::Estimate(90_000));

    let full = engine(&store, EngineConfig::default());
    let response = full.execute("/Observations", "$count=true").await.unwrap();
    let body = response.collect().await.unwrap();
    assert!(body.starts_with(b"{\"@iot.count\":5,\"value\":["));

    let estimating = engine(
        &store,
        EngineConfig::default()
            .with_count_mode(CountMode::LimitEstimate)
            .with_count_estimate_threshold(10),
    );
    let doc = get_json(&estimating, "/Observations", "$count=true").await;
    assert_eq!(doc["@iot.count"], 90_000);
    assert_eq!(store.estimates(), 1);
}

#[tokio::test]
async fn test_nested_expansion() {
    let store = ScriptedStore::new();
    store.on(
        "\"Thing\" AS t0",
        Answer::Rows(vec![row(1, json!({ "name": "boiler" }))]),
    );
    store.on(
        "\"Datastream\" AS t0",
        Answer::Rows(vec![
            child_row(7, 1, 2, json!({ "name": "temperature" })),
            child_row(8, 1, 2, json!({ "name": "pressure" })),
        ]),
    );
    store.on(
        "\"Observation\" AS t0",
        Answer::Rows(vec![
            child_row(70, 7, 1, json!({ "result": 21.5 })),
            child_row(80, 8, 1, json!({ "result": 1013 })),
        ]),
    );
    let engine = engine(&store, EngineConfig::default());
    let doc = get_json(
        &engine,
        "/Things(1)",
        "$select=name&$expand=Datastreams($select=name;$expand=Observations($select=result))",
    )
    .await;
    assert_eq!(
        doc,
        json!({
            "name": "boiler",
            "Datastreams": [
                { "name": "temperature", "Observations": [{ "result": 21.5 }] },
                { "name": "pressure", "Observations": [{ "result": 1013 }] }
            ]
        })
    );

    let fetches = store.fetches();
    assert_eq!(fetches.len(), 3);
    assert_eq!(fetches[1].params[0], SqlParam::IntArray(vec![1]));
    assert_eq!(fetches[2].params[0], SqlParam::IntArray(vec![7, 8]));
}

#[tokio::test]
async fn test_expand_limit_is_client_error() {
    let store = ScriptedStore::new();
    let engine = engine(&store, EngineConfig::default().with_expand_limits(1, 4));
    let err = engine
        .execute("/Things", "$expand=Datastreams/Observations")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExpandLimitExceeded(_)));
    assert_eq!(err.status_code(), 400);
    assert!(store.fetches().is_empty());
}

#[tokio::test]
async fn test_as_of_reads_history() {
    let store = ScriptedStore::new();
    store.on(
        "\"Thing_traveltime\")",
        Answer::Rows(vec![row(1, json!({ "name": "v1" }))]),
    );
    let engine = engine(&store, EngineConfig::default().with_versioning(true));
    let doc = get_json(&engine, "/Things(1)", "$as_of=2024-01-01T12:00:00Z").await;
    assert_eq!(doc["name"], "v1");
    assert_eq!(
        doc["Commit@iot.navigationLink"],
        "http://localhost:8018/v1.1/Things(1)/Commit"
    );

    let query = &store.fetches()[0];
    assert!(query.sql.contains("\"Thing_traveltime\""));
    assert!(query.sql.contains("t0.\"systemTimeValidity\" @> $2::timestamptz"));
    assert!(matches!(query.params[1], SqlParam::Timestamp(_)));
}

#[tokio::test]
async fn test_from_to_single_entity_shows_latest_version() {
    let store = ScriptedStore::new();
    // newest first, as the descending validity order returns them
    store.on(
        "\"Sensor_traveltime\")",
        Answer::Rows(vec![
            row(4, json!({ "name": "v2" })),
            row(4, json!({ "name": "v1" })),
        ]),
    );
    let engine = engine(&store, EngineConfig::default().with_versioning(true));
    let doc = get_json(
        &engine,
        "/Sensors(4)",
        "$from_to=2024-01-01T00:00:00Z/2024-02-01T00:00:00Z",
    )
    .await;
    assert_eq!(doc["name"], "v2");

    let query = &store.fetches()[0];
    assert!(query.sql.contains("&& tstzrange("));
    assert!(query
        .sql
        .ends_with("ORDER BY lower(t0.\"systemTimeValidity\") DESC, t0.\"id\" ASC LIMIT 1"));
}

#[tokio::test]
async fn test_top_zero_counts_without_rows() {
    let store = ScriptedStore::new();
    store.on("SELECT COUNT(*)", Answer::Scalar(2));
    store.on(
        "\"Thing\" AS t0",
        Answer::Rows(vec![row(1, json!({})), row(2, json!({}))]),
    );
    let engine = engine(&store, EngineConfig::default());
    let doc = get_json(&engine, "/Things", "$top=0&$count=true").await;
    assert_eq!(doc, json!({ "@iot.count": 2, "value": [] }));
    assert_eq!(store.fetches()[0].params, vec![SqlParam::Int(1), SqlParam::Int(0)]);
}

#[tokio::test]
async fn test_nested_skip() {
    let store = ScriptedStore::new();
    store.on("\"Thing\" AS t0", Answer::Rows(vec![row(1, json!({}))]));
    store.on(
        "\"Datastream\" AS t0",
        Answer::Rows(vec![
            child_row(8, 1, 3, json!({ "name": "b" })),
            child_row(9, 1, 3, json!({ "name": "c" })),
        ]),
    );
    let engine = engine(&store, EngineConfig::default());
    let doc = get_json(
        &engine,
        "/Things(1)",
        "$select=id&$expand=Datastreams($select=name;$skip=1;$top=1)",
    )
    .await;
    assert_eq!(
        doc,
        json!({
            "@iot.id": 1,
            "Datastreams": [{ "name": "b" }],
            "Datastreams@iot.nextLink": "http://localhost:8018/v1.1/Things(1)/Datastreams?$select=name&$top=1&$skip=2"
        })
    );
    let nested = &store.fetches()[1];
    assert_eq!(nested.params[1..], [SqlParam::Int(1), SqlParam::Int(3)]);
}

#[tokio::test]
async fn test_nested_skip_past_the_group_keeps_count() {
    let store = ScriptedStore::new();
    store.on("\"Thing\" AS t0", Answer::Rows(vec![row(1, json!({}))]));
    store.on(
        "\"Datastream\" AS t0",
        Answer::Rows(vec![count_only_row(7, 1, 3)]),
    );
    let engine = engine(&store, EngineConfig::default());
    let doc = get_json(
        &engine,
        "/Things(1)",
        "$select=id&$expand=Datastreams($skip=5;$count=true)",
    )
    .await;
    assert_eq!(
        doc,
        json!({ "@iot.id": 1, "Datastreams@iot.count": 3, "Datastreams": [] })
    );
    assert!(store.fetches()[1].sql.contains("OR \"__rn\" = 1"));
}

#[tokio::test]
async fn test_to_one_expansion() {
    let store = ScriptedStore::new();
    store.on(
        "\"Datastream\" AS t0",
        Answer::Rows(vec![child_row(3, 5, 1, json!({ "name": "temperature" }))]),
    );
    store.on(
        "\"Observation\" AS t0",
        Answer::Rows(vec![row(5, json!({ "result": 21.5 }))]),
    );
    let engine = engine(&store, EngineConfig::default());
    let doc = get_json(
        &engine,
        "/Observations(5)",
        "$select=result&$expand=Datastream($select=name)",
    )
    .await;
    assert_eq!(
        doc,
        json!({ "result": 21.5, "Datastream": { "name": "temperature" } })
    );

    let nested = &store.fetches()[1];
    assert_eq!(nested.params[0], SqlParam::IntArray(vec![5]));
    assert!(!nested.sql.contains("\"__rn\" >"));
}

#[tokio::test]
async fn test_one_session_per_request() {
    let store = ScriptedStore::new();
    store.on("SELECT COUNT(*)", Answer::Scalar(1));
    store.on("\"Thing\" AS t0", Answer::Rows(vec![row(1, json!({}))]));
    store.on(
        "\"Datastream\" AS t0",
        Answer::Rows(vec![child_row(7, 1, 1, json!({}))]),
    );
    let engine = engine(&store, EngineConfig::default());
    get_json(&engine, "/Things", "$count=true&$expand=Datastreams").await;
    assert_eq!(store.fetches().len(), 2);
    assert_eq!(store.scalars(), 1);
    assert_eq!(store.sessions(), 1);
}

#[tokio::test]
async fn test_property_value_is_plain_text() {
    let store = ScriptedStore::new();
    store.on(
        "\"Datastream\" AS t0",
        Answer::Rows(vec![row(3, json!({ "unitOfMeasurement": { "symbol": "degC" } }))]),
    );
    let response = engine(&store, EngineConfig::default())
        .execute("/Datastreams(3)/unitOfMeasurement/$value", "")
        .await
        .unwrap();
    assert_eq!(response.content_type, "text/plain; charset=utf-8");
    assert_eq!(&response.collect().await.unwrap()[..], b"{\"symbol\":\"degC\"}");
}

#[tokio::test]
async fn test_collection_refs() {
    let store = ScriptedStore::new();
    store.on("\"Location\" AS t0", Answer::Rows(vec![row(2, json!({}))]));
    let doc = get_json(
        &engine(&store, EngineConfig::default()),
        "/Things(1)/Locations/$ref",
        "",
    )
    .await;
    assert_eq!(
        doc,
        json!({ "value": [{ "@iot.selfLink": "http://localhost:8018/v1.1/Locations(2)" }] })
    );
}

#[tokio::test]
async fn test_store_outage_before_output() {
    let store = ScriptedStore::new();
    store.on("\"Thing\"", Answer::Unavailable);
    let err = engine(&store, EngineConfig::default())
        .execute("/Things", "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn test_timeout_after_output_breaks_the_body() {
    let store = ScriptedStore::new();
    store.on("\"Thing\" AS t0", Answer::Rows(vec![row(1, json!({}))]));
    store.on_delayed(
        "\"Datastream\" AS t0",
        Duration::from_millis(500),
        Answer::Rows(Vec::new()),
    );
    let config = EngineConfig::default().with_request_timeout(Duration::from_millis(50));
    let response = engine(&store, config)
        .execute("/Things", "$expand=Datastreams")
        .await
        .unwrap();
    assert!(matches!(
        response.collect().await,
        Err(Error::ExecutionTimeout(_))
    ));
}

#[tokio::test]
async fn test_disconnect_releases_cursor() {
    let store = ScriptedStore::new();
    store.on(
        "\"Observation\" AS t0",
        Answer::Rows((1..=5_000).map(|i| row(i, json!({}))).collect()),
    );
    let config = EngineConfig::default()
        .with_page_sizes(10_000, 10_000)
        .with_partition_chunk(10)
        .with_stream_buffer(1);
    let response = engine(&store, config)
        .execute("/Observations", "$select=id")
        .await
        .unwrap();
    let mut body = response.body;
    assert!(body.next().await.is_some());
    drop(body);

    for _ in 0..100 {
        if store.cancelled() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.cancelled(), 1);
}
