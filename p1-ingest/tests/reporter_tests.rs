use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use meter_store::{NewRecord, RecordStore, StoreConfig};
use p1_ingest::reporter;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup(dir: &TempDir) -> (RecordStore, Router) {
    let path = dir.path().join("meter.db");
    let store = RecordStore::open(&StoreConfig::new(format!("sqlite://{}", path.display())))
        .await
        .unwrap();
    let app = reporter::router(store.clone());
    (store, app)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn ndjson(body: &str) -> Vec<Value> {
    body.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
}

#[tokio::test]
async fn records_endpoint_streams_range_in_order() {
    let dir = TempDir::new().unwrap();
    let (store, app) = setup(&dir).await;

    store
        .append(&NewRecord { delivered_1: Some(12.5), current_tariff: Some(1), ..NewRecord::at(1000) })
        .await
        .unwrap();
    store
        .append(&NewRecord { delivered_1: Some(12.6), current_tariff: Some(2), ..NewRecord::at(1000) })
        .await
        .unwrap();
    store.append(&NewRecord::at(2000)).await.unwrap();

    let (status, body) = get(&app, "/records?from=1000&to=1000").await;
    assert_eq!(status, StatusCode::OK);

    let rows = ndjson(&body);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], 1);
    assert_eq!(rows[1]["id"], 2);
    assert_eq!(rows[0]["delivered_1"], 12.5);
    // Absent is null, not zero.
    assert!(rows[0]["received_1"].is_null());
}

#[tokio::test]
async fn records_endpoint_applies_field_filter() {
    let dir = TempDir::new().unwrap();
    let (store, app) = setup(&dir).await;

    store
        .append(&NewRecord::at(10).with_delivered(1.0, 2.0).with_max_power(3.0))
        .await
        .unwrap();

    let (status, body) = get(&app, "/records?fields=max_power").await;
    assert_eq!(status, StatusCode::OK);

    let rows = ndjson(&body);
    assert_eq!(rows[0]["max_power"], 3.0);
    assert!(rows[0]["delivered_1"].is_null());
    assert_eq!(rows[0]["timestamp"], 10);
}

#[tokio::test]
async fn unknown_field_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let (_store, app) = setup(&dir).await;

    let (status, body) = get(&app, "/records?fields=kwh").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("kwh"));
}

#[tokio::test]
async fn record_by_id_and_not_found() {
    let dir = TempDir::new().unwrap();
    let (store, app) = setup(&dir).await;

    let id = store.append(&NewRecord::at(42).with_switch_mode(0)).await.unwrap();

    let (status, body) = get(&app, &format!("/records/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    let row: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(row["timestamp"], 42);
    assert_eq!(row["switch_mode"], 0);

    let (status, _) = get(&app, "/records/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn latest_record_endpoint() {
    let dir = TempDir::new().unwrap();
    let (store, app) = setup(&dir).await;

    let (status, _) = get(&app, "/records/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    store.append(&NewRecord::at(300)).await.unwrap();
    let newest = store.append(&NewRecord::at(700)).await.unwrap();
    store.append(&NewRecord::at(200)).await.unwrap();

    let (status, body) = get(&app, "/records/latest").await;
    assert_eq!(status, StatusCode::OK);
    let row: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(row["id"], newest);
}

#[tokio::test]
async fn health_endpoint() {
    let dir = TempDir::new().unwrap();
    let (_store, app) = setup(&dir).await;

    assert_eq!(get(&app, "/health").await, (StatusCode::OK, "ok".to_string()));
}
