use std::{sync::Arc, time::Duration};

use meter_store::{FieldFilter, NewRecord, RecordStore, StoreConfig};
use p1_ingest::{
    pipeline::Pipeline,
    retention::{self, RetentionPolicy},
    sinks::RecordStoreSink,
    sources::{P1CaptureFileSource, RecordBackfillFileSource, RecordCsvFileSource},
    transform::RecordValidation,
};
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> RecordStore {
    let path = dir.path().join("meter.db");
    RecordStore::open(&StoreConfig::new(format!("sqlite://{}", path.display())))
        .await
        .expect("open store")
}

fn sink(store: &RecordStore) -> RecordStoreSink {
    RecordStoreSink::new(store.clone(), 2, Duration::from_millis(10))
}

#[tokio::test]
async fn csv_backfill_stores_valid_rows_and_skips_bad_ones() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let csv_path = dir.path().join("backfill.csv");
    std::fs::write(
        &csv_path,
        "timestamp,delivered_1,received_1,current_tariff,max_power\n\
         1000,12.5,,1,\n\
         ,13.0,,1,\n\
         1000,12.6,,2,\n\
         900,not-a-number,,1,\n\
         990,12.4,0,1,4.2\n",
    )
    .unwrap();

    let pipeline: Pipeline<_, NewRecord, _> = Pipeline {
        source: RecordCsvFileSource::new(&csv_path),
        transforms: vec![Arc::new(RecordValidation)],
        sink: sink(&store),
    };
    pipeline.run().await.unwrap();

    let records = store.range_vec(i64::MIN, i64::MAX, FieldFilter::all()).await.unwrap();
    let keys: Vec<(i64, i64)> = records.iter().map(|r| (r.timestamp(), r.id())).collect();
    assert_eq!(keys, vec![(990, 3), (1000, 1), (1000, 2)]);

    assert_eq!(records[0].received_1(), Some(0.0));
    assert_eq!(records[1].received_1(), None);
    assert_eq!(records[1].max_power(), None);
    assert_eq!(records[2].current_tariff(), Some(2));
}

#[tokio::test]
async fn ndjson_backfill_round_trips_through_store() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let path = dir.path().join("backfill.ndjson");
    std::fs::write(
        &path,
        concat!(
            r#"{"timestamp": 2000, "actual_delivered": 0.25, "switch_mode": 1}"#,
            "\n\n",
            r#"{"actual_delivered": 0.30}"#,
            "\n",
            r#"{"timestamp": 2001, "actual_delivered": 0.0}"#,
            "\n",
        ),
    )
    .unwrap();

    let pipeline: Pipeline<_, NewRecord, _> = Pipeline {
        source: RecordBackfillFileSource::new(&path),
        transforms: vec![Arc::new(RecordValidation)],
        sink: sink(&store),
    };
    pipeline.run().await.unwrap();

    let records = store.range_vec(2000, 2001, FieldFilter::all()).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].switch_mode(), Some(1));
    assert_eq!(records[1].actual_delivered(), Some(0.0));
    assert_eq!(records[1].switch_mode(), None);
}

#[tokio::test]
async fn capture_file_uses_meter_clock() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let path = dir.path().join("p1.capture");
    std::fs::write(
        &path,
        "/ISk5\\2MT382-1000\r\n\
         \r\n\
         0-0:1.0.0(210701120000S)\r\n\
         1-0:1.8.1(001234.567*kWh)\r\n\
         1-0:1.8.2(002345.678*kWh)\r\n\
         0-0:96.14.0(0001)\r\n\
         1-0:1.7.0(00.512*kW)\r\n\
         !1E1D\r\n\
         /ISk5\\2MT382-1000\r\n\
         1-0:1.8.1(001234.600*kWh)\r\n\
         !\r\n\
         /ISk5\\2MT382-1000\r\n\
         0-0:1.0.0(210701120010S)\r\n\
         1-0:1.8.1(001234.700*kWh)\r\n\
         0-0:96.14.0(0002)\r\n\
         !\r\n",
    )
    .unwrap();

    let pipeline: Pipeline<_, NewRecord, _> = Pipeline {
        source: P1CaptureFileSource::new(&path),
        transforms: vec![Arc::new(RecordValidation)],
        sink: sink(&store),
    };
    pipeline.run().await.unwrap();

    // The middle telegram has no clock line and is rejected.
    let records = store.range_vec(i64::MIN, i64::MAX, FieldFilter::all()).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].timestamp(), 1_625_133_600);
    assert_eq!(records[0].delivered_2(), Some(2345.678));
    assert_eq!(records[0].actual_delivered(), Some(0.512));
    assert_eq!(records[0].received_1(), None);
    assert_eq!(records[1].timestamp(), 1_625_133_610);
    assert_eq!(records[1].current_tariff(), Some(2));
}

#[tokio::test]
async fn sink_discards_invalid_records_without_retrying() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let path = dir.path().join("backfill.ndjson");
    std::fs::write(&path, "{\"timestamp\": 99999999999999999}\n{\"timestamp\": 5}\n").unwrap();

    // No validation transform: the store itself rejects the first record.
    let pipeline: Pipeline<_, NewRecord, _> = Pipeline {
        source: RecordBackfillFileSource::new(&path),
        transforms: vec![],
        sink: sink(&store),
    };
    pipeline.run().await.unwrap();

    let records = store.range_vec(i64::MIN, i64::MAX, FieldFilter::all()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp(), 5);
}

#[tokio::test]
async fn retention_purges_only_expired_records() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    for ts in [1_000, 5_000, 9_000, 9_500] {
        store.append(&NewRecord::at(ts)).await.unwrap();
    }

    let policy = RetentionPolicy {
        keep: Duration::from_secs(1_000),
        interval: Duration::from_secs(60),
    };
    let removed = retention::purge_expired(&store, &policy, 10_000).await.unwrap();
    assert_eq!(removed, 2);

    let left: Vec<i64> = store
        .range_vec(i64::MIN, i64::MAX, FieldFilter::none())
        .await
        .unwrap()
        .iter()
        .map(|r| r.timestamp())
        .collect();
    assert_eq!(left, vec![9_000, 9_500]);
}
