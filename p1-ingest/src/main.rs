use std::sync::Arc;

use anyhow::{anyhow, Result};
use meter_store::{NewRecord, RecordStore};
use p1_ingest::{
    config::AppConfig,
    metrics_server, observability,
    pipeline::Pipeline,
    reporter, retention,
    sinks::RecordStoreSink,
    sources::P1SerialSource,
    transform,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    let store = RecordStore::open(&cfg.store.store_config()).await?;

    // Reporter API and metrics share one listener when configured
    let mut reporter_task = match &cfg.http {
        Some(http_cfg) => {
            metrics_server::install()?;
            let app = reporter::router(store.clone()).merge(metrics_server::router());
            Some(reporter::serve(&http_cfg.bind_addr, app).await?)
        }
        None => None,
    };

    let retention_task = cfg
        .retention
        .as_ref()
        .map(|r| retention::spawn(store.clone(), r.into()));

    let pipeline: Pipeline<_, NewRecord, _> = Pipeline {
        source: P1SerialSource::new(&cfg.p1),
        transforms: vec![Arc::new(transform::RecordValidation)],
        sink: RecordStoreSink::from_config(store.clone(), &cfg.sink),
    };

    let outcome: Result<()> = tokio::select! {
        res = pipeline.run() => match res {
            Ok(()) => Err(anyhow!("P1 source ended unexpectedly")),
            Err(e) => Err(e.into()),
        },
        _ = async {
            match reporter_task.as_mut() {
                Some(task) => {
                    let _ = task.await;
                }
                None => std::future::pending::<()>().await,
            }
        } => Err(anyhow!("reporter server stopped")),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
    };

    if let Some(task) = retention_task {
        task.abort();
    }
    if let Some(task) = reporter_task {
        task.abort();
    }
    store.close().await;

    outcome
}
