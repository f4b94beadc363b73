use std::time::Duration;

use meter_store::{RecordStore, StoreError};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::config::RetentionConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub keep: Duration,
    pub interval: Duration,
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(cfg: &RetentionConfig) -> Self {
        Self {
            keep: Duration::from_secs(cfg.keep_secs),
            interval: Duration::from_secs(cfg.interval_secs.max(1)),
        }
    }
}

impl RetentionPolicy {
    /// Records with a timestamp before the returned cutoff are expired at `now`.
    pub fn cutoff(&self, now: i64) -> i64 {
        let keep = i64::try_from(self.keep.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(keep)
    }
}

/// Purge everything older than the policy allows, relative to `now`.
pub async fn purge_expired(store: &RecordStore, policy: &RetentionPolicy, now: i64) -> Result<u64, StoreError> {
    let cutoff = policy.cutoff(now);
    let removed = store.purge(cutoff).await?;
    metrics::counter!("retention_purged_total").increment(removed);
    if removed > 0 {
        tracing::info!(cutoff, removed, "purged expired records");
    }
    Ok(removed)
}

/// Run [`purge_expired`] every `policy.interval` until the task is aborted.
/// Failures are logged and retried on the next tick.
pub fn spawn(store: RecordStore, policy: RetentionPolicy) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(policy.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let now = OffsetDateTime::now_utc().unix_timestamp();
            if let Err(e) = purge_expired(&store, &policy, now).await {
                tracing::error!(error = %e, "retention purge failed");
            }
        }
    })
}
