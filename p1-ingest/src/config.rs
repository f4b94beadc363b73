use serde::Deserialize;
use std::{fs, time::Duration};

use meter_store::StoreConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl StoreSection {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            op_timeout: Duration::from_millis(self.op_timeout_ms),
        }
    }
}

/// Which clock stamps a telegram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Time the telegram was fully received by this process.
    #[default]
    Received,
    /// The meter's own `0-0:1.0.0` clock line.
    Meter,
}

/// Serial framing: DSMR 2.x/3.0 meters use 7E1 at 9600 baud, DSMR 4 and
/// later 8N1 at 115200 baud.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SerialFraming {
    #[default]
    #[serde(rename = "7e1")]
    SevenEvenOne,
    #[serde(rename = "8n1")]
    EightNoneOne,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct P1Config {
    pub device: String,
    pub baud_rate: u32,
    pub framing: SerialFraming,
    /// A telegram arrives every few seconds; silence longer than this is reported.
    pub read_timeout_secs: u64,
    pub timestamp_source: TimestampSource,
}

impl Default for P1Config {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            framing: SerialFraming::SevenEvenOne,
            read_timeout_secs: 15,
            timestamp_source: TimestampSource::Received,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Records older than this many seconds are purged.
    pub keep_secs: u64,
    #[serde(default = "default_retention_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreSection,
    #[serde(default)]
    pub p1: P1Config,
    #[serde(default)]
    pub sink: SinkConfig,
    pub retention: Option<RetentionConfig>,
    pub http: Option<HttpConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("P1_INGEST_CONFIG").unwrap_or_else(|_| "p1-ingest.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config file '{path}': {e}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_op_timeout_ms() -> u64 {
    10_000
}

fn default_retention_interval_secs() -> u64 {
    3_600
}
