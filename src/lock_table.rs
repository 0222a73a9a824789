//! Row-level lock table keyed by `(table, id)`.
//!
//! Acquisition is a single atomic `INSERT ... ON CONFLICT DO NOTHING` to
//! close the check-then-insert race a naive "look then insert" sequence
//! would have, with a bounded wait-and-retry loop driven by `EngineConfig`
//! in place of unbounded recursion.

use crate::config::EngineConfig;
use crate::dependency_graph;
use crate::error::{Error, Result};
use rand::Rng;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

/// Attempt to acquire a lock on `(table, id)` for `txn_id`. Blocks
/// (wait-and-retry) while another transaction holds it, recording a
/// dependency edge each time and re-checking after `config.lock_retry_delay`.
///
/// On success, writes the bookkeeping `root.locks.tx_<id>.<table>_<rid>`
/// path. On cycle detection during the wait, the caller's dependency/lock
/// paths have already been cleaned up by
/// `dependency_graph::add_dependency_and_check`; this function just
/// propagates `Error::DependencyCycle`.
#[instrument(level = "debug", skip(pool, config))]
pub async fn acquire(
    pool: &PgPool,
    txn_id: i64,
    table: &str,
    id: i64,
    kind: LockKind,
    config: &EngineConfig,
) -> Result<()> {
    let mut attempts: u32 = 0;

    loop {
        let shared = kind == LockKind::Read;
        let row: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO locks (record_table, record_id, txid, shared)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (record_table, record_id) DO NOTHING
             RETURNING id",
        )
        .bind(table)
        .bind(id)
        .bind(txn_id)
        .bind(shared)
        .fetch_optional(pool)
        .await
        .map_err(Error::LockBackendFailure)?;

        if row.is_some() {
            dependency_graph::add_lock_path(pool, txn_id, table, id).await?;
            debug!(table, id, txn_id, attempts, "acquired lock");
            return Ok(());
        }

        // Someone else holds it. Find out who, record the dependency, and
        // let cycle detection decide whether we should keep waiting.
        let holder: (i64,) = sqlx::query_as(
            "SELECT txid FROM locks WHERE record_table = $1 AND record_id = $2",
        )
        .bind(table)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Error::LockBackendFailure)?;

        if holder.0 == txn_id {
            // We already hold it (re-entrant acquire on the same id).
            return Ok(());
        }

        dependency_graph::add_dependency_and_check(pool, txn_id, holder.0).await?;

        attempts += 1;
        if let Some(max) = config.max_lock_retries {
            if attempts >= max {
                warn!(table, id, txn_id, attempts, holder = holder.0, "giving up on lock acquisition");
                return Err(Error::LockBackendFailure(sqlx::Error::Protocol(format!(
                    "giving up acquiring lock on {table}#{id} after {attempts} attempts"
                ))));
            }
        }

        if !config.lock_retry_delay.is_zero() {
            // Jitter the delay by +/-25% so transactions contending on the
            // same row don't retry in lockstep.
            let jitter = rand::thread_rng().gen_range(0.75..1.25);
            tokio::time::sleep(config.lock_retry_delay.mul_f64(jitter)).await;
        }
    }
}

/// Release every lock owned by `txn_id`. Implicit at commit/rollback,
/// never called mid-transaction.
pub async fn release_all(pool: &PgPool, txn_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM locks WHERE txid = $1")
        .bind(txn_id)
        .execute(pool)
        .await
        .map_err(Error::LockBackendFailure)?;
    Ok(())
}

/// Release a single lock by its row id, used during rollback of a `Delete`
/// operation to undo just that operation's lock without releasing the
/// whole transaction's lock set.
pub async fn release_by_id(pool: &PgPool, lock_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM locks WHERE id = $1")
        .bind(lock_id)
        .execute(pool)
        .await
        .map_err(Error::LockBackendFailure)?;
    Ok(())
}

/// Look up the lock row id for `(table, id)`, used when a `Delete`
/// operation needs to remember which lock to release on rollback.
pub async fn find_lock_id(pool: &PgPool, table: &str, id: i64) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM locks WHERE record_table = $1 AND record_id = $2")
            .bind(table)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Error::LockBackendFailure)?;
    Ok(row.map(|r| r.0))
}
