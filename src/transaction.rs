//! Transaction coordinator: the public entry point for opening, using, and
//! closing out a single MVCC transaction.
//!
//! A `Transaction` keeps an in-memory log of the operations it performed
//! (`insert`/`update`/`delete`) so that `commit` and `rollback` know which
//! rows' MVCC flags to flip without re-deriving them from the database.

use crate::config::EngineConfig;
use crate::dependency_graph;
use crate::error::{Error, Result};
use crate::lock_table::{self, LockKind};
use crate::value::{Payload, Value};
use crate::version_store;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Committed,
    RolledBack,
}

impl Status {
    fn as_db_str(self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Committed => "committed",
            Status::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug, Clone)]
enum Operation {
    Insert { table: String, id: i64 },
    Update { table: String, id: i64 },
    Delete {
        table: String,
        id: i64,
        lock_id: i64,
    },
}

/// A single open transaction. Holds both pools it needs (metadata and
/// application) plus the engine's tunables, and accumulates an operation
/// log as the caller performs work through it.
pub struct Transaction {
    pub id: i64,
    /// Wall-clock nanoseconds since the Unix epoch when this transaction
    /// was opened.
    pub timestamp: i64,
    status: Status,
    metadata_pool: PgPool,
    app_pool: PgPool,
    config: EngineConfig,
    log: Vec<Operation>,
}

/// Open a new transaction: allocate its id from `transactions`, stamp it
/// with the current wall-clock time, and mark it active. Callers are
/// expected to serialize calls to `open` through a single mutex held at
/// the engine level, since id allocation and the first visibility checks
/// that follow it are not otherwise protected against another `open`
/// racing in between.
pub async fn open(metadata_pool: &PgPool, app_pool: &PgPool, config: EngineConfig) -> Result<Transaction> {
    let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or(0);

    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO transactions (status, timestamp) VALUES ('active', $1) RETURNING id",
    )
    .bind(timestamp)
    .fetch_one(metadata_pool)
    .await
    .map_err(Error::LockBackendFailure)?;

    debug!(txn_id = id, timestamp, "opened transaction");

    Ok(Transaction {
        id,
        timestamp,
        status: Status::Active,
        metadata_pool: metadata_pool.clone(),
        app_pool: app_pool.clone(),
        config,
        log: Vec::new(),
    })
}

impl Transaction {
    pub fn status(&self) -> Status {
        self.status
    }

    fn require_active(&self) -> Result<()> {
        if self.status != Status::Active {
            return Err(Error::InvalidState {
                txn_id: self.id,
                status: self.status.as_db_str().to_string(),
            });
        }
        Ok(())
    }

    /// Insert a new logical row. No lock is needed: nothing else can see or
    /// contend for a row that doesn't exist yet.
    pub async fn insert(&mut self, table: &str, fields: &[String], values: &[Value]) -> Result<i64> {
        self.require_active()?;
        let id = version_store::insert(&self.app_pool, table, self.id, fields, values).await?;
        self.log.push(Operation::Insert {
            table: table.to_string(),
            id,
        });
        Ok(id)
    }

    /// Supersede the current version of `(table, id)` with a new one.
    /// Takes a write lock first so a concurrent updater can't race past
    /// visibility checks and clobber this write.
    pub async fn update(
        &mut self,
        table: &str,
        id: i64,
        fields: &[String],
        values: &[Value],
    ) -> Result<()> {
        self.require_active()?;
        lock_table::acquire(&self.metadata_pool, self.id, table, id, LockKind::Write, &self.config)
            .await?;
        version_store::update(&self.app_pool, table, id, self.id, fields, values).await?;
        self.log.push(Operation::Update {
            table: table.to_string(),
            id,
        });
        Ok(())
    }

    /// Mark the current visible version of `(table, id)` as superseded by
    /// this transaction. Takes the write lock before checking visibility,
    /// so the lock's own dependency/cycle bookkeeping covers this path too.
    pub async fn delete(&mut self, table: &str, id: i64) -> Result<()> {
        self.require_active()?;
        lock_table::acquire(&self.metadata_pool, self.id, table, id, LockKind::Write, &self.config)
            .await?;
        version_store::delete(&self.app_pool, table, id, self.id).await?;
        let lock_id = lock_table::find_lock_id(&self.metadata_pool, table, id)
            .await?
            .ok_or_else(|| Error::InvalidState {
                txn_id: self.id,
                status: "lock vanished after acquire".to_string(),
            })?;
        self.log.push(Operation::Delete {
            table: table.to_string(),
            id,
            lock_id,
        });
        Ok(())
    }

    /// Fetch the single visible row for `(table, id)`.
    pub async fn select(&self, table: &str, id: i64) -> Result<Payload> {
        version_store::select(&self.app_pool, table, id, self.id).await
    }

    /// Fetch every visible row in `table` matching `column = value`, or
    /// every visible row if `predicate` is `None`.
    pub async fn where_(&self, table: &str, predicate: Option<(&str, &Value)>) -> Result<Vec<Payload>> {
        version_store::where_(&self.app_pool, table, predicate, self.id).await
    }

    /// Commit: re-check for a dependency cycle (closing the window between
    /// the transaction's last lock acquisition and commit), flip the
    /// `*_committed` flag on every row this transaction touched, drop its
    /// dependency/lock bookkeeping, and mark the transaction row committed.
    #[instrument(level = "debug", skip(self), fields(txn_id = self.id))]
    pub async fn commit(mut self) -> Result<()> {
        self.require_active()?;

        if dependency_graph::has_cycle(&self.metadata_pool, self.id).await? {
            dependency_graph::cleanup(&self.metadata_pool, self.id).await?;
            return Err(Error::DependencyCycle { txn_id: self.id });
        }

        for op in &self.log {
            match op {
                Operation::Delete { table, id, .. } => {
                    sqlx::query(&format!(
                        "UPDATE {table} SET tx_max_committed = TRUE WHERE id = $1 AND tx_max = $2"
                    ))
                    .bind(id)
                    .bind(self.id)
                    .execute(&self.app_pool)
                    .await?;
                }
                Operation::Insert { table, id } | Operation::Update { table, id } => {
                    sqlx::query(&format!(
                        "UPDATE {table} SET tx_min_committed = TRUE WHERE id = $1 AND tx_min = $2"
                    ))
                    .bind(id)
                    .bind(self.id)
                    .execute(&self.app_pool)
                    .await?;
                }
            }
            if !self.config.inter_step_delay.is_zero() {
                tokio::time::sleep(self.config.inter_step_delay).await;
            }
        }

        dependency_graph::cleanup(&self.metadata_pool, self.id).await?;
        lock_table::release_all(&self.metadata_pool, self.id).await?;

        sqlx::query("UPDATE transactions SET status = 'committed' WHERE id = $1")
            .bind(self.id)
            .execute(&self.metadata_pool)
            .await
            .map_err(Error::LockBackendFailure)?;

        self.status = Status::Committed;
        debug!(txn_id = self.id, operations = self.log.len(), "committed transaction");
        Ok(())
    }

    /// Roll back: undo every logged operation's visible effect (un-mark
    /// inserted/updated rows as creating anything, release per-delete
    /// locks individually, drop remaining lock/dependency bookkeeping) and
    /// mark the transaction row rolled back. A transaction already
    /// committed is left untouched, matching `commit`'s own idempotence
    /// expectations.
    #[instrument(level = "debug", skip(self), fields(txn_id = self.id))]
    pub async fn rollback(mut self) -> Result<()> {
        if self.status == Status::Committed {
            return Ok(());
        }

        for op in &self.log {
            match op {
                Operation::Delete { table, id, lock_id } => {
                    sqlx::query(&format!(
                        "UPDATE {table} SET tx_max_rolled_back = TRUE WHERE tx_max = $1 AND id = $2"
                    ))
                    .bind(self.id)
                    .bind(id)
                    .execute(&self.app_pool)
                    .await?;
                    lock_table::release_by_id(&self.metadata_pool, *lock_id).await?;
                }
                Operation::Insert { table, id } => {
                    sqlx::query(&format!(
                        "UPDATE {table} SET tx_min_rolled_back = TRUE WHERE tx_min = $1 AND id = $2"
                    ))
                    .bind(self.id)
                    .bind(id)
                    .execute(&self.app_pool)
                    .await?;
                }
                Operation::Update { table, id } => {
                    sqlx::query(&format!(
                        "UPDATE {table} SET tx_min_rolled_back = TRUE WHERE tx_min = $1 AND id = $2"
                    ))
                    .bind(self.id)
                    .bind(id)
                    .execute(&self.app_pool)
                    .await?;
                    sqlx::query(&format!(
                        "UPDATE {table} SET tx_max_rolled_back = TRUE WHERE tx_max = $1 AND id = $2"
                    ))
                    .bind(self.id)
                    .bind(id)
                    .execute(&self.app_pool)
                    .await?;
                }
            }
        }

        dependency_graph::cleanup(&self.metadata_pool, self.id).await?;
        lock_table::release_all(&self.metadata_pool, self.id).await?;

        sqlx::query("UPDATE transactions SET status = 'rolled_back' WHERE id = $1")
            .bind(self.id)
            .execute(&self.metadata_pool)
            .await
            .map_err(Error::LockBackendFailure)?;

        self.status = Status::RolledBack;
        debug!(txn_id = self.id, operations = self.log.len(), "rolled back transaction");
        Ok(())
    }
}
