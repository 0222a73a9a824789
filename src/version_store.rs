//! Version store: SQL-backed read/write of versioned rows in arbitrary
//! application tables.
//!
//! `where_` and `select` narrow candidates with a SQL-level CTE first
//! (cheap: newest version per logical id, excluding rows no snapshot could
//! ever see) and then apply the exact visibility predicate in engine code,
//! so the two stay provably in agreement rather than duplicating the
//! predicate's logic in SQL.

use crate::error::{Error, Result};
use crate::value::{payload_from_row, payload_json, value_clauses, Payload, Value};
use crate::visibility::{self, RowVersion};
use sqlx::PgPool;
use tracing::{debug, instrument};

const MVCC_COLUMNS: [&str; 6] = [
    "tx_min",
    "tx_max",
    "tx_min_committed",
    "tx_max_committed",
    "tx_min_rolled_back",
    "tx_max_rolled_back",
];

/// Allocate a new logical row id from `<table>_id_seq` and insert the first
/// version: `tx_min = txn_id`, `tx_max = 0`, all flags false.
#[instrument(level = "debug", skip(pool, values))]
pub async fn insert(
    pool: &PgPool,
    table: &str,
    txn_id: i64,
    fields: &[String],
    values: &[Value],
) -> Result<i64> {
    let seq_name = format!("{table}_id_seq");
    let (id,): (i64,) = sqlx::query_as(&format!("SELECT nextval('{seq_name}')"))
        .fetch_one(pool)
        .await?;

    let mut all_fields: Vec<String> = vec!["id".into()];
    all_fields.extend(MVCC_COLUMNS.iter().map(|s| s.to_string()));
    all_fields.extend(fields.iter().cloned());

    let mut placeholders: Vec<String> = (1..=7).map(|i| format!("${i}")).collect();
    let (value_placeholders, bind_values) = value_clauses(values, 8);
    placeholders.extend(value_placeholders);

    let stmt = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        all_fields.join(", "),
        placeholders.join(", ")
    );

    let mut query = sqlx::query(&stmt);
    query = query.bind(id);
    query = query.bind(txn_id); // tx_min
    query = query.bind(0i64); // tx_max
    query = query.bind(false); // tx_min_committed
    query = query.bind(false); // tx_max_committed
    query = query.bind(false); // tx_min_rolled_back
    query = query.bind(false); // tx_max_rolled_back
    for v in bind_values {
        query = v.bind(query);
    }
    query.execute(pool).await?;

    debug!(table, id, txn_id, payload = %payload_json(fields, values), "inserted new row version");
    Ok(id)
}

/// Supersede the current version of `(table, id)` with a new one carrying
/// the updated payload. Caller must already hold the write lock.
#[instrument(level = "debug", skip(pool, values))]
pub async fn update(
    pool: &PgPool,
    table: &str,
    id: i64,
    txn_id: i64,
    fields: &[String],
    values: &[Value],
) -> Result<()> {
    let (current_tx_min,): (i64,) = sqlx::query_as(&format!(
        "SELECT tx_min FROM {table} WHERE id = $1 AND tx_max = 0 ORDER BY tx_min DESC LIMIT 1"
    ))
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(|_| Error::NotFound {
        table: table.to_string(),
        id,
    })?;

    sqlx::query(&format!(
        "UPDATE {table} SET tx_max = $1, tx_max_committed = FALSE
         WHERE id = $2 AND tx_min = $3 AND tx_max = 0"
    ))
    .bind(txn_id)
    .bind(id)
    .bind(current_tx_min)
    .execute(pool)
    .await?;

    let mut all_fields: Vec<String> = vec!["id".into()];
    all_fields.extend(MVCC_COLUMNS.iter().map(|s| s.to_string()));
    all_fields.extend(fields.iter().cloned());
    let mut placeholders: Vec<String> = (1..=7).map(|i| format!("${i}")).collect();
    let (value_placeholders, bind_values) = value_clauses(values, 8);
    placeholders.extend(value_placeholders);

    let stmt = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        all_fields.join(", "),
        placeholders.join(", ")
    );

    let mut query = sqlx::query(&stmt);
    query = query.bind(id);
    query = query.bind(txn_id); // tx_min
    query = query.bind(0i64); // tx_max
    query = query.bind(false); // tx_min_committed
    query = query.bind(false); // tx_max_committed
    query = query.bind(false); // tx_min_rolled_back
    query = query.bind(false); // tx_max_rolled_back
    for v in bind_values {
        query = v.bind(query);
    }
    query.execute(pool).await?;

    debug!(table, id, txn_id, payload = %payload_json(fields, values), "inserted successor version");
    Ok(())
}

/// Mark the current visible version of `(table, id)` as superseded by
/// `txn_id`. Requires the version to be visible to `txn_id`; returns
/// `ConcurrencyConflict` otherwise. Caller must already hold the write lock.
/// Returns the `tx_min` of the version that was marked, so the caller's
/// operation log can find it again at commit time.
#[instrument(level = "debug", skip(pool))]
pub async fn delete(pool: &PgPool, table: &str, id: i64, txn_id: i64) -> Result<i64> {
    let version = select_raw(pool, table, id).await?;

    if !visibility::is_visible(&version, txn_id) {
        return Err(Error::ConcurrencyConflict {
            txn_id,
            table: table.to_string(),
            id,
        });
    }

    sqlx::query(&format!(
        "UPDATE {table} SET tx_max = $1, tx_max_rolled_back = FALSE
         WHERE tx_min = $2 AND id = $3"
    ))
    .bind(txn_id)
    .bind(version.tx_min)
    .bind(id)
    .execute(pool)
    .await?;

    debug!(table, id, txn_id, "marked row version for deletion");
    Ok(version.tx_min)
}

/// Fetch the current (`tx_max = 0`, newest `tx_min`) version's MVCC columns
/// for `(table, id)`, without applying visibility — used by `delete` to
/// decide visibility itself, and by `select`/`where_` as the raw candidate
/// set before the in-engine predicate.
async fn select_raw(pool: &PgPool, table: &str, id: i64) -> Result<RowVersion> {
    let row: Option<(i64, i64, bool, bool, bool, bool)> = sqlx::query_as(&format!(
        "SELECT tx_min, tx_max, tx_min_committed, tx_max_committed,
                tx_min_rolled_back, tx_max_rolled_back
         FROM {table} WHERE id = $1
         ORDER BY tx_min DESC LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|(tx_min, tx_max, tmc, tmxc, tmrb, tmxrb)| RowVersion {
        tx_min,
        tx_max,
        tx_min_committed: tmc,
        tx_max_committed: tmxc,
        tx_min_rolled_back: tmrb,
        tx_max_rolled_back: tmxrb,
    })
    .ok_or_else(|| Error::NotFound {
        table: table.to_string(),
        id,
    })
}

/// Single-row variant of `where_`: fail with `NotFound` if no visible
/// version exists.
pub async fn select(pool: &PgPool, table: &str, id: i64, txn_id: i64) -> Result<Payload> {
    let rows = where_(pool, table, Some(("id", &Value::Int(id))), txn_id).await?;
    rows.into_iter().next().ok_or_else(|| Error::NotFound {
        table: table.to_string(),
        id,
    })
}

/// Candidate-then-filter query: ask Postgres for the newest version per
/// logical id that *could* be visible, then apply the exact visibility
/// predicate in engine code as the final filter. `column = None` means
/// "no predicate beyond the MVCC filter".
#[instrument(level = "debug", skip(pool, predicate))]
pub async fn where_(
    pool: &PgPool,
    table: &str,
    predicate: Option<(&str, &Value)>,
    txn_id: i64,
) -> Result<Vec<Payload>> {
    let mut query_str = format!(
        "WITH latest_versions AS (
            SELECT DISTINCT ON (id) *
            FROM {table}
            WHERE "
    );

    if let Some((column, value)) = predicate {
        if matches!(value, Value::Null) {
            query_str.push_str(&format!("{column} IS NULL AND "));
        } else {
            query_str.push_str(&format!("{column} = $2 AND "));
        }
    }

    query_str.push_str(
        "tx_min_committed = TRUE
            AND NOT tx_min_rolled_back
            AND (tx_max = 0 OR (tx_max > $1 AND NOT tx_max_committed))
            ORDER BY id, tx_min DESC
        )
        SELECT * FROM latest_versions",
    );

    let mut query = sqlx::query(&query_str).bind(txn_id);
    if let Some((_, value)) = predicate {
        if !matches!(value, Value::Null) {
            query = value.bind(query);
        }
    }

    let rows = query.fetch_all(pool).await?;

    let mut all_columns: Vec<String> = Vec::new();
    if let Some(first) = rows.first() {
        use sqlx::Row as _;
        for col in first.columns() {
            all_columns.push(col.name().to_string());
        }
    }
    let payload_columns: Vec<String> = all_columns
        .into_iter()
        .filter(|c| c != "id" && !MVCC_COLUMNS.contains(&c.as_str()))
        .collect();

    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
        use sqlx::Row as _;
        let version = RowVersion {
            tx_min: row.try_get("tx_min")?,
            tx_max: row.try_get("tx_max")?,
            tx_min_committed: row.try_get("tx_min_committed")?,
            tx_max_committed: row.try_get("tx_max_committed")?,
            tx_min_rolled_back: row.try_get("tx_min_rolled_back")?,
            tx_max_rolled_back: row.try_get("tx_max_rolled_back")?,
        };

        if visibility::is_visible(&version, txn_id) {
            results.push(payload_from_row(row, &payload_columns));
        }
    }

    debug!(table, txn_id, visible = results.len(), candidates = rows.len(), "where query complete");
    Ok(results)
}
