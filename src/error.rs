//! Error taxonomy for the transaction engine.
//!
//! One variant per failure family the engine can surface to a caller.
//! No variant is process-fatal; every write path leaves the in-memory
//! operation log untouched on failure so a caller can always fall back
//! to `Transaction::rollback`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Select/Delete target row does not exist.
    #[error("record not found: {table}#{id}")]
    NotFound { table: String, id: i64 },

    /// Row exists but is not visible to the requesting transaction
    /// (aborted insert by a concurrent transaction, or deleted by one).
    #[error("transaction {txn_id} aborted due to concurrency conflict on {table}#{id}")]
    ConcurrencyConflict {
        txn_id: i64,
        table: String,
        id: i64,
    },

    /// The wait-for graph would cycle if this transaction kept waiting.
    #[error("dependency cycle detected for transaction {txn_id}")]
    DependencyCycle { txn_id: i64 },

    /// A query against the lock table itself failed.
    #[error("lock backend failure: {0}")]
    LockBackendFailure(#[source] sqlx::Error),

    /// Any other metadata/application store failure.
    #[error("store failure: {0}")]
    StoreFailure(#[source] sqlx::Error),

    /// Caller tried to operate on a non-active transaction.
    #[error("transaction {txn_id} is not active (status: {status})")]
    InvalidState { txn_id: i64, status: String },
}

impl Error {
    /// Category label, handy for logging/metrics call sites without
    /// matching on the full enum.
    pub fn category(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::ConcurrencyConflict { .. } => "concurrency_conflict",
            Error::DependencyCycle { .. } => "dependency_cycle",
            Error::LockBackendFailure(_) => "lock_backend_failure",
            Error::StoreFailure(_) => "store_failure",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}

/// Bare `sqlx::Error`s raised while touching the application store are
/// surfaced as `StoreFailure` by default; call sites that know they're
/// touching the lock table construct `LockBackendFailure` explicitly.
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::StoreFailure(e)
    }
}
