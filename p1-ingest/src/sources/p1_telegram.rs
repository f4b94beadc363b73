use std::{io, path::PathBuf, time::Duration};

use futures::StreamExt;
use meter_store::NewRecord;
use time::OffsetDateTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};

use crate::{
    config::TimestampSource,
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
    telegram::{Telegram, TelegramAssembler},
};

/// Telegram lines are well under 1 KiB; anything longer is line noise.
const MAX_LINE_BYTES: usize = 1024;

fn stamp(telegram: Telegram, source: TimestampSource) -> NewRecord {
    let timestamp = match source {
        TimestampSource::Received => Some(OffsetDateTime::now_utc().unix_timestamp()),
        TimestampSource::Meter => telegram.meter_timestamp,
    };

    NewRecord {
        timestamp,
        ..telegram.record
    }
}

/// A line being read off the wire. Bytes beyond `MAX_LINE_BYTES` are dropped
/// and the line is flagged instead of growing without bound.
#[derive(Default)]
struct PartialLine {
    bytes: Vec<u8>,
    overlong: bool,
}

impl PartialLine {
    fn take(&mut self) -> (String, bool) {
        let line = String::from_utf8_lossy(&self.bytes).into_owned();
        let overlong = self.overlong;
        self.bytes.clear();
        self.overlong = false;
        (line, overlong)
    }
}

/// Read up to and including the next `\n` into `line`. Returns `false` at end
/// of input with nothing buffered.
///
/// Cancel safe: bytes are moved into `line` before they are consumed, so a
/// timeout between reads loses nothing.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, line: &mut PartialLine) -> io::Result<bool> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(!line.bytes.is_empty() || line.overlong);
        }

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..=pos], true),
            None => (available, false),
        };
        let room = MAX_LINE_BYTES.saturating_sub(line.bytes.len());
        if chunk.len() > room {
            line.overlong = true;
        }
        line.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);

        let used = chunk.len();
        reader.consume(used);
        if done {
            return Ok(true);
        }
    }
}

/// Turn a byte stream of P1 telegrams into one record per telegram.
///
/// With an `idle_timeout`, a gap between lines longer than the timeout is
/// reported as a source error and reading continues. Line noise never ends
/// the stream: invalid UTF-8 is decoded lossily and overlong lines are
/// counted and skipped.
pub(crate) fn telegram_records<R>(
    reader: R,
    timestamp_source: TimestampSource,
    idle_timeout: Option<Duration>,
) -> EnvelopeStream<NewRecord>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let s = async_stream::stream! {
        let mut reader = BufReader::new(reader);
        let mut partial = PartialLine::default();
        let mut assembler = TelegramAssembler::new();

        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, read_line(&mut reader, &mut partial)).await {
                    Ok(next) => next,
                    Err(_) => {
                        metrics::counter!("p1_idle_timeouts_total").increment(1);
                        yield Err(PipelineError::Source(format!("no P1 data received for {limit:?}")));
                        continue;
                    }
                },
                None => read_line(&mut reader, &mut partial).await,
            };

            match next {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to read P1 line: {e}")));
                    break;
                }
            }

            let (line, overlong) = partial.take();
            if overlong {
                metrics::counter!("p1_malformed_lines_total").increment(1);
                tracing::warn!(max = MAX_LINE_BYTES, "skipping overlong P1 line");
                continue;
            }

            if let Some(telegram) = assembler.push_line(&line) {
                metrics::counter!("p1_frames_total").increment(1);
                if telegram.malformed_lines > 0 {
                    tracing::warn!(malformed = telegram.malformed_lines, "telegram had unreadable registers");
                }
                yield Ok(Envelope::new(stamp(telegram, timestamp_source)));
            }
        }
    };

    Box::pin(s)
}

/// Replays telegrams captured from a P1 port into a file.
///
/// Captures are usually replayed long after they were taken, so records are
/// stamped with the meter's clock by default; telegrams without a clock line
/// are then rejected downstream for lacking a timestamp.
pub struct P1CaptureFileSource {
    path: PathBuf,
    timestamp_source: TimestampSource,
}

impl P1CaptureFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            timestamp_source: TimestampSource::Meter,
        }
    }

    pub fn with_timestamp_source(mut self, timestamp_source: TimestampSource) -> Self {
        self.timestamp_source = timestamp_source;
        self
    }
}

#[async_trait::async_trait]
impl Source<NewRecord> for P1CaptureFileSource {
    async fn stream(&self) -> EnvelopeStream<NewRecord> {
        let path = self.path.clone();
        let timestamp_source = self.timestamp_source;

        let s = async_stream::stream! {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open P1 capture file: {e}")));
                    return;
                }
            };

            let mut records = telegram_records(file, timestamp_source, None);
            while let Some(item) = records.next().await {
                yield item;
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_yields_one_record_per_telegram() {
        let text = "/XMX5\r\n0-0:1.0.0(210701120000S)\r\n1-0:1.8.1(1.5*kWh)\r\n!\r\n\
                    /XMX5\r\n0-0:1.0.0(210701120010S)\r\n1-0:1.8.1(1.6*kWh)\r\n!\r\n";
        let stream = telegram_records(text.as_bytes(), TimestampSource::Meter, None);
        let records: Vec<_> = stream.map(|r| r.unwrap().payload).collect().await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, Some(1_625_133_600));
        assert_eq!(records[0].delivered_1, Some(1.5));
        assert_eq!(records[1].timestamp, Some(1_625_133_610));
    }

    #[tokio::test]
    async fn received_clock_stamps_current_time() {
        let before = OffsetDateTime::now_utc().unix_timestamp();
        let stream = telegram_records(&b"/X\n!\n"[..], TimestampSource::Received, None);
        let records: Vec<_> = stream.map(|r| r.unwrap().payload).collect().await;

        let ts = records[0].timestamp.unwrap();
        assert!(ts >= before);
    }

    #[tokio::test]
    async fn meter_clock_missing_leaves_record_unstamped() {
        let stream = telegram_records(&b"/X\n1-0:1.7.0(0.1*kW)\n!\n"[..], TimestampSource::Meter, None);
        let records: Vec<_> = stream.map(|r| r.unwrap().payload).collect().await;

        assert_eq!(records[0].timestamp, None);
        assert_eq!(records[0].actual_delivered, Some(0.1));
    }

    #[tokio::test]
    async fn line_noise_between_telegrams_is_skipped() {
        let mut bytes = b"/XMX5\r\n0-0:1.0.0(210701120000S)\r\n1-0:1.8.1(1.5*kWh)\r\n!\r\n".to_vec();
        bytes.extend_from_slice(b"\xff\xfe noise\n");
        bytes.extend_from_slice(b"/XMX5\r\n0-0:1.0.0(210701120010S)\r\n1-0:1.8.1(1.6\xff*kWh)\r\n1-0:1.8.2(2.0*kWh)\r\n!\r\n");

        let stream = telegram_records(std::io::Cursor::new(bytes), TimestampSource::Meter, None);
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 2);
        let second = items[1].as_ref().unwrap();
        assert_eq!(second.payload.timestamp, Some(1_625_133_610));
        assert_eq!(second.payload.delivered_1, None);
        assert_eq!(second.payload.delivered_2, Some(2.0));
    }

    #[tokio::test]
    async fn overlong_line_is_dropped_and_reading_continues() {
        let mut bytes = b"/XMX5\n".to_vec();
        bytes.extend(std::iter::repeat(b'x').take(MAX_LINE_BYTES * 3));
        bytes.extend_from_slice(b"\n1-0:1.7.0(0.25*kW)\n!\n/XMX5\n1-0:1.7.0(0.5*kW)\n!");

        let stream = telegram_records(std::io::Cursor::new(bytes), TimestampSource::Meter, None);
        let records: Vec<_> = stream.map(|r| r.unwrap().payload).collect().await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].actual_delivered, Some(0.25));
        // The final terminator has no trailing newline.
        assert_eq!(records[1].actual_delivered, Some(0.5));
    }

    #[tokio::test]
    async fn missing_capture_file_is_a_source_error() {
        let source = P1CaptureFileSource::new("/nonexistent/p1.capture");
        let items: Vec<_> = source.stream().await.collect().await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Source(_))));
    }
}
