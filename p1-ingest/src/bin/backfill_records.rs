use anyhow::{bail, Result};
use meter_store::{NewRecord, RecordStore};
use p1_ingest::{
    config::AppConfig,
    observability,
    pipeline::{Pipeline, Source},
    sinks::RecordStoreSink,
    sources::{P1CaptureFileSource, RecordBackfillFileSource, RecordCsvFileSource},
    transform,
};
use std::{env, path::Path, sync::Arc};

async fn run<S>(source: S, store: &RecordStore, cfg: &AppConfig) -> Result<()>
where
    S: Source<NewRecord> + 'static,
{
    let pipeline: Pipeline<_, NewRecord, _> = Pipeline {
        source,
        transforms: vec![Arc::new(transform::RecordValidation)],
        sink: RecordStoreSink::from_config(store.clone(), &cfg.sink),
    };

    pipeline.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: backfill_records <file.csv|file.ndjson|p1-capture>");
    }
    let file_path = &args[1];

    // Load configuration (can point P1_INGEST_CONFIG to a backfill-specific file).
    let cfg = AppConfig::load()?;
    let store = RecordStore::open(&cfg.store.store_config()).await?;
    let before = store.count().await?;

    let extension = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    match extension {
        "csv" => run(RecordCsvFileSource::new(file_path), &store, &cfg).await?,
        "ndjson" | "jsonl" => run(RecordBackfillFileSource::new(file_path), &store, &cfg).await?,
        _ => run(P1CaptureFileSource::new(file_path), &store, &cfg).await?,
    }

    let after = store.count().await?;
    tracing::info!(file = %file_path, appended = after.saturating_sub(before), "backfill finished");
    store.close().await;

    Ok(())
}
