use std::path::PathBuf;

use async_stream::stream;
use meter_store::NewRecord;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// A simple NDJSON backfill source for meter records.
///
/// Each line is a JSON object with the record's column names, e.g.
/// `{"timestamp": 1000, "delivered_1": 12.5, "current_tariff": 1}`.
/// Omitted keys and `null` values are absent.
pub struct RecordBackfillFileSource {
    path: PathBuf,
}

impl RecordBackfillFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_line(line: &str) -> Result<NewRecord, PipelineError> {
    serde_json::from_str(line).map_err(|e| {
        metrics::counter!("record_backfill_parse_errors_total").increment(1);
        PipelineError::Source(format!("failed to parse backfill json line: {e}"))
    })
}

#[async_trait::async_trait]
impl Source<NewRecord> for RecordBackfillFileSource {
    async fn stream(&self) -> EnvelopeStream<NewRecord> {
        let path = self.path.clone();
        let s = stream! {
            let file = match File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open backfill file: {e}")));
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        yield parse_line(&line).map(Envelope::new);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(PipelineError::Source(format!("failed to read backfill line: {e}")));
                        break;
                    }
                }
            }
        };

        Box::pin(s)
    }
}
