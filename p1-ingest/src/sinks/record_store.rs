use std::time::{Duration, Instant, SystemTime};

use futures::StreamExt;
use meter_store::{NewRecord, RecordStore, StoreError};

use crate::{
    config::SinkConfig,
    pipeline::{Envelope, PipelineError, Sink},
};

/// Appends every incoming record to the [`RecordStore`].
///
/// Retry policy lives here, not in the store: storage failures and timeouts
/// are retried with linear backoff, validation failures are logged and the
/// sample is discarded.
pub struct RecordStoreSink {
    store: RecordStore,
    max_retries: u32,
    retry_backoff: Duration,
}

impl RecordStoreSink {
    pub fn new(store: RecordStore, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            store,
            max_retries,
            retry_backoff,
        }
    }

    pub fn from_config(store: RecordStore, cfg: &SinkConfig) -> Self {
        Self::new(store, cfg.max_retries, Duration::from_millis(cfg.retry_backoff_ms))
    }

    /// Returns the new id, or `None` when the record was discarded.
    async fn append(&self, env: &Envelope<NewRecord>) -> Result<Option<i64>, PipelineError> {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            match self.store.append(&env.payload).await {
                Ok(id) => {
                    metrics::counter!("record_store_appended_total").increment(1);
                    metrics::histogram!("record_store_append_latency_seconds")
                        .record(started.elapsed().as_secs_f64());
                    if let Ok(age) = SystemTime::now().duration_since(env.received_at) {
                        metrics::histogram!("ingest_end_to_end_latency_seconds").record(age.as_secs_f64());
                    }
                    return Ok(Some(id));
                }
                Err(StoreError::Validation(e)) => {
                    tracing::warn!(error = %e, "store rejected record, discarding");
                    metrics::counter!("validation_record_rejected_total").increment(1);
                    return Ok(None);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "record append failed, retrying with backoff"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "record append failed, giving up");
                    metrics::counter!("record_store_append_errors_total").increment(1);
                    return Err(PipelineError::Sink(e));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<NewRecord> for RecordStoreSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<NewRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline for RecordStoreSink");
                    continue;
                }
            };

            if let Some(id) = self.append(&env).await? {
                tracing::debug!(id, timestamp = ?env.payload.timestamp, "stored record");
            }
        }

        Ok(())
    }
}
