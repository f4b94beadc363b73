use sqlx::{Executor, Sqlite};

use crate::domain::{Field, FieldFilter, NewRecord, Record};

/// Insert one record and return the id SQLite assigned to it.
///
/// `timestamp` is the already validated timestamp of `record`.
pub async fn insert_record<'e, E>(executor: E, timestamp: i64, record: &NewRecord) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO records (
            timestamp,
            delivered_1,
            delivered_2,
            received_1,
            received_2,
            current_tariff,
            actual_delivered,
            actual_received,
            max_power,
            switch_mode
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(timestamp)
    .bind(record.delivered_1)
    .bind(record.delivered_2)
    .bind(record.received_1)
    .bind(record.received_2)
    .bind(record.current_tariff)
    .bind(record.actual_delivered)
    .bind(record.actual_received)
    .bind(record.max_power)
    .bind(record.switch_mode)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Point lookup by surrogate key.
pub async fn fetch_record<'e, E>(executor: E, id: i64) -> Result<Option<Record>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", select_clause(FieldFilter::all()));
    sqlx::query_as::<_, Record>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// The record with the greatest `(timestamp, id)`.
pub async fn fetch_latest<'e, E>(executor: E) -> Result<Option<Record>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "{} ORDER BY timestamp DESC, id DESC LIMIT 1",
        select_clause(FieldFilter::all())
    );
    sqlx::query_as::<_, Record>(&sql).fetch_optional(executor).await
}

pub async fn count_records<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records")
        .fetch_one(executor)
        .await
}

/// Delete every record strictly older than `before`, returning how many went.
pub async fn delete_before<'e, E>(executor: E, before: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM records WHERE timestamp < ?")
        .bind(before)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// SQL for a closed timestamp range, bound as `(from, to)`.
///
/// Ordering by `(timestamp, id)` is served directly by the
/// `records_timestamp_id` index.
pub fn range_sql(filter: FieldFilter) -> String {
    format!(
        r#"
        {}
        WHERE timestamp >= ?
          AND timestamp <= ?
        ORDER BY timestamp, id
        "#,
        select_clause(filter)
    )
}

/// Columns left out of `filter` are selected as NULL so every row still maps
/// onto [`Record`], with those fields absent.
fn select_clause(filter: FieldFilter) -> String {
    let mut sql = String::from("SELECT id, timestamp");
    for field in Field::ALL {
        sql.push_str(", ");
        if filter.contains(field) {
            sql.push_str(field.column());
        } else {
            sql.push_str("NULL AS ");
            sql.push_str(field.column());
        }
    }
    sql.push_str(" FROM records");
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_clause_nulls_out_unrequested_columns() {
        let filter = FieldFilter::none().with(Field::MaxPower);
        let sql = select_clause(filter);

        assert!(sql.starts_with("SELECT id, timestamp, NULL AS delivered_1"));
        assert!(sql.contains(", max_power,"));
        assert!(sql.contains("NULL AS switch_mode FROM records"));
    }

    #[test]
    fn range_sql_orders_by_timestamp_then_id() {
        let sql = range_sql(FieldFilter::all());
        assert!(sql.contains("ORDER BY timestamp, id"));
        assert!(!sql.contains("NULL AS"));
    }
}
