use sqlx::SqlitePool;

/// DDL for the single `records` table.
///
/// `AUTOINCREMENT` keeps the id high-water mark in `sqlite_sequence`, so ids
/// stay strictly increasing and are never handed out again after a purge.
/// The trigger makes committed rows append-only at the storage level.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp        INTEGER NOT NULL,
    delivered_1      REAL,
    delivered_2      REAL,
    received_1       REAL,
    received_2       REAL,
    current_tariff   INTEGER,
    actual_delivered REAL,
    actual_received  REAL,
    max_power        REAL,
    switch_mode      INTEGER
);

CREATE INDEX IF NOT EXISTS records_timestamp_id ON records (timestamp, id);

CREATE TRIGGER IF NOT EXISTS records_append_only
BEFORE UPDATE ON records
BEGIN
    SELECT RAISE(ABORT, 'records are append-only');
END;
"#;

pub async fn apply(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
