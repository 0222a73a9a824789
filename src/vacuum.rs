//! Garbage collection of superseded row versions.
//!
//! A version is safe to physically delete once no active transaction's
//! snapshot could still see it: it must already be either a committed
//! delete (`tx_max != 0 && tx_max_committed`) or a rolled-back insert
//! (`tx_min_rolled_back`), and no active transaction's id must fall
//! strictly between its `tx_min` and `tx_max`.

use crate::error::{Error, Result};
use sqlx::PgPool;
use tracing::{debug, info, instrument};

/// List every user application table eligible for vacuuming: everything in
/// the public schema except Postgres' own catalog tables and the
/// migration-tracking table.
pub async fn list_tables(app_pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename FROM pg_catalog.pg_tables
         WHERE schemaname != 'pg_catalog'
         AND schemaname != 'information_schema'
         AND tablename != 'schema_migrations'",
    )
    .fetch_all(app_pool)
    .await?;

    Ok(rows.into_iter().map(|(t,)| t).collect())
}

/// Reclaim dead versions across every table returned by `list_tables`.
/// Returns the number of rows physically deleted.
#[instrument(level = "debug", skip(metadata_pool, app_pool))]
pub async fn vacuum_all(metadata_pool: &PgPool, app_pool: &PgPool) -> Result<u64> {
    let tables = list_tables(app_pool).await?;
    let mut total = 0u64;
    for table in &tables {
        total += vacuum_table(metadata_pool, app_pool, table).await?;
    }
    if total > 0 {
        info!(deleted = total, tables = tables.len(), "vacuum reclaimed dead row versions");
    }
    Ok(total)
}

/// Reclaim dead versions in a single table.
#[instrument(level = "debug", skip(metadata_pool, app_pool))]
pub async fn vacuum_table(metadata_pool: &PgPool, app_pool: &PgPool, table: &str) -> Result<u64> {
    let active_ids: Vec<(i64,)> =
        sqlx::query_as("SELECT id FROM transactions WHERE status = 'active'")
            .fetch_all(metadata_pool)
            .await
            .map_err(Error::LockBackendFailure)?;
    let active_ids: Vec<i64> = active_ids.into_iter().map(|(id,)| id).collect();

    let candidates: Vec<(i64, i64, i64)> = sqlx::query_as(&format!(
        "SELECT tx_min, tx_max, id FROM {table}
         WHERE (tx_max != 0 AND tx_max_committed = TRUE) OR tx_min_rolled_back = TRUE"
    ))
    .fetch_all(app_pool)
    .await?;

    let mut deleted = 0u64;
    for (tx_min, tx_max, id) in candidates {
        let spanned = active_ids
            .iter()
            .any(|&active| active > tx_min && active < tx_max);
        if spanned {
            continue;
        }

        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE tx_min = $1 AND tx_max = $2 AND id = $3"
        ))
        .bind(tx_min)
        .bind(tx_max)
        .bind(id)
        .execute(app_pool)
        .await?;

        deleted += result.rows_affected();
    }

    debug!(table, deleted, "vacuumed table");
    Ok(deleted)
}
