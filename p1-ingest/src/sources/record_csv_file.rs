use std::{fmt::Display, fs::File, path::PathBuf, str::FromStr};

use csv::StringRecord;
use meter_store::{Field, NewRecord};

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// CSV backfill source for meter records.
///
/// Expected header columns (by name):
/// - timestamp (seconds since the Unix epoch, UTC)
/// - any of the record's optional columns, e.g. `delivered_1`, `current_tariff`
///
/// Columns missing from the header and empty cells are absent, never zero.
/// Unknown columns are ignored.
pub struct RecordCsvFileSource {
    path: PathBuf,
}

impl RecordCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_optional<T>(record: &StringRecord, headers: &StringRecord, name: &str) -> Result<Option<T>, PipelineError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = match headers.iter().position(|h| h.trim() == name) {
        Some(idx) => record.get(idx).unwrap_or("").trim(),
        None => return Ok(None),
    };

    if raw.is_empty() {
        return Ok(None);
    }

    raw.parse()
        .map(Some)
        .map_err(|e| PipelineError::Source(format!("invalid {name} '{raw}': {e}")))
}

fn record_to_new_record(record: &StringRecord, headers: &StringRecord) -> Result<NewRecord, PipelineError> {
    let real = |field: Field| parse_optional::<f64>(record, headers, field.column());
    let integer = |field: Field| parse_optional::<i32>(record, headers, field.column());

    Ok(NewRecord {
        timestamp: parse_optional(record, headers, "timestamp")?,
        delivered_1: real(Field::Delivered1)?,
        delivered_2: real(Field::Delivered2)?,
        received_1: real(Field::Received1)?,
        received_2: real(Field::Received2)?,
        current_tariff: integer(Field::CurrentTariff)?,
        actual_delivered: real(Field::ActualDelivered)?,
        actual_received: real(Field::ActualReceived)?,
        max_power: real(Field::MaxPower)?,
        switch_mode: integer(Field::SwitchMode)?,
    })
}

#[async_trait::async_trait]
impl Source<NewRecord> for RecordCsvFileSource {
    async fn stream(&self) -> EnvelopeStream<NewRecord> {
        // Blocking CSV reader inside a single async task; backfill files are
        // read once and throughput is bounded by the store anyway.
        let path = self.path.clone();
        let s = async_stream::stream! {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open CSV file: {e}")));
                    return;
                }
            };
            let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
            let headers = match rdr.headers() {
                Ok(headers) => headers.clone(),
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to read CSV headers: {e}")));
                    return;
                }
            };

            for result in rdr.records() {
                let row = result
                    .map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))
                    .and_then(|record| record_to_new_record(&record, &headers));

                match row {
                    Ok(record) => yield Ok(Envelope::new(record)),
                    Err(e) => {
                        metrics::counter!("record_csv_parse_errors_total").increment(1);
                        yield Err(e);
                    }
                }
            }
        };

        Box::pin(s)
    }
}
