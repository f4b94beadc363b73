use std::time::Duration;

use futures::StreamExt;
use meter_store::NewRecord;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};

use super::p1_telegram::telegram_records;
use crate::{
    config::{P1Config, SerialFraming},
    pipeline::{EnvelopeStream, PipelineError, Source},
};

/// Reads telegrams straight from the meter's P1 port.
pub struct P1SerialSource {
    config: P1Config,
}

impl P1SerialSource {
    pub fn new(config: &P1Config) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Source<NewRecord> for P1SerialSource {
    async fn stream(&self) -> EnvelopeStream<NewRecord> {
        let cfg = self.config.clone();
        let read_timeout = Duration::from_secs(cfg.read_timeout_secs);

        let (data_bits, parity) = match cfg.framing {
            SerialFraming::SevenEvenOne => (DataBits::Seven, Parity::Even),
            SerialFraming::EightNoneOne => (DataBits::Eight, Parity::None),
        };

        let s = async_stream::stream! {
            let port = tokio_serial::new(cfg.device.as_str(), cfg.baud_rate)
                .data_bits(data_bits)
                .parity(parity)
                .stop_bits(StopBits::One)
                .timeout(read_timeout)
                .open_native_async();

            let port = match port {
                Ok(port) => port,
                Err(e) => {
                    yield Err(PipelineError::Source(format!(
                        "failed to open P1 serial device '{}': {e}",
                        cfg.device
                    )));
                    return;
                }
            };
            tracing::info!(device = %cfg.device, baud_rate = cfg.baud_rate, "reading P1 telegrams");

            let mut records = telegram_records(port, cfg.timestamp_source, Some(read_timeout));
            while let Some(item) = records.next().await {
                yield item;
            }
        };

        Box::pin(s)
    }
}
