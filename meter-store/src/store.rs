use std::{future::Future, pin::Pin, str::FromStr, sync::Arc, time::Duration};

use futures::{Stream, TryStreamExt};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    db::{record_queries, schema},
    domain::{FieldFilter, NewRecord, Record},
    error::StoreError,
};

/// Lazily evaluated result of [`RecordStore::range_query`].
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Record, StoreError>> + Send>>;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite URL, e.g. `sqlite://./meter.db`.
    pub url: String,
    /// Size of the read pool. Writes always go through one extra, dedicated
    /// connection that readers cannot hold.
    pub max_connections: u32,
    /// How long a connection waits on SQLite's file lock before failing.
    pub busy_timeout: Duration,
    /// Upper bound for every store operation, measured up to (not including) commit.
    pub op_timeout: Duration,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(10),
        }
    }
}

/// Durable, timestamp-ordered store of meter records backed by SQLite.
///
/// The store is cheap to clone; clones share the connection pools.
#[derive(Clone)]
pub struct RecordStore {
    /// Single connection; SQLite admits one writer at a time anyway.
    writer: SqlitePool,
    reader: SqlitePool,
    op_timeout: Duration,
    purge_lock: Arc<Mutex<()>>,
}

impl RecordStore {
    /// Open (creating if necessary) the database at `config.url` and apply the schema.
    ///
    /// The database runs in WAL mode: readers see a consistent snapshot per
    /// statement and never block on writers.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(config.busy_timeout);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        schema::apply(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        info!(url = %config.url, readers = config.max_connections, "opened meter record store");

        Ok(Self {
            writer,
            reader,
            op_timeout: config.op_timeout,
            purge_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Persist `record` and return its freshly assigned id.
    ///
    /// The insert runs in its own transaction. If validation, the insert or the
    /// commit fails, or the operation times out before commit, nothing is
    /// persisted. An id consumed by a rolled back insert is skipped, never reused.
    pub async fn append(&self, record: &NewRecord) -> Result<i64, StoreError> {
        let timestamp = record.validate()?;

        let (tx, id) = self
            .bounded(async {
                let mut tx = self.writer.begin().await?;
                let id = record_queries::insert_record(&mut *tx, timestamp, record).await?;
                Ok::<_, StoreError>((tx, id))
            })
            .await?;
        tx.commit().await?;

        debug!(id, timestamp, "appended record");
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> Result<Record, StoreError> {
        self.bounded(async {
            record_queries::fetch_record(&self.reader, id)
                .await?
                .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    /// Records with `from <= timestamp <= to`, ordered by `(timestamp, id)`.
    ///
    /// Nothing happens until the stream is first polled: that is when a read
    /// connection is taken and the statement starts. The query is a single
    /// statement, so it reads one snapshot fixed at that first poll. Appends
    /// committed after it may be missing, earlier ones are all present, and a
    /// concurrent purge is seen either entirely or not at all.
    ///
    /// An open stream holds one read connection until it is drained or
    /// dropped; appends and purges never wait on it.
    /// Optional columns outside `filter` are returned absent.
    pub fn range_query(&self, from: i64, to: i64, filter: FieldFilter) -> RecordStream {
        let pool = self.reader.clone();
        let op_timeout = self.op_timeout;

        let stream = async_stream::try_stream! {
            let sql = record_queries::range_sql(filter);
            let mut conn = tokio::time::timeout(op_timeout, pool.acquire())
                .await
                .map_err(|_| StoreError::Timeout(op_timeout))??;

            let mut rows = sqlx::query_as::<_, Record>(&sql)
                .bind(from)
                .bind(to)
                .fetch(&mut *conn);

            while let Some(record) = rows.try_next().await? {
                yield record;
            }
        };

        Box::pin(stream)
    }

    /// Convenience over [`range_query`](Self::range_query) that collects every row.
    pub async fn range_vec(&self, from: i64, to: i64, filter: FieldFilter) -> Result<Vec<Record>, StoreError> {
        self.range_query(from, to, filter).try_collect().await
    }

    /// Delete all records with `timestamp < before` and return how many were removed.
    ///
    /// Purges are serialized with each other; appends and queries proceed
    /// concurrently and observe the table either before or after the delete.
    pub async fn purge(&self, before: i64) -> Result<u64, StoreError> {
        let _guard = self.purge_lock.lock().await;

        let (tx, removed) = self
            .bounded(async {
                let mut tx = self.writer.begin().await?;
                let removed = record_queries::delete_before(&mut *tx, before).await?;
                Ok::<_, StoreError>((tx, removed))
            })
            .await?;
        tx.commit().await?;

        debug!(before, removed, "purged records");
        Ok(removed)
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let n = self
            .bounded(async { Ok::<_, StoreError>(record_queries::count_records(&self.reader).await?) })
            .await?;
        Ok(n.max(0) as u64)
    }

    /// The most recent record by `(timestamp, id)`, if any.
    pub async fn latest(&self) -> Result<Option<Record>, StoreError> {
        self.bounded(async { Ok::<_, StoreError>(record_queries::fetch_latest(&self.reader).await?) })
            .await
    }

    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
    }
}
