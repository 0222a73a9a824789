//! Top-level facade: bundles the two pools a transaction needs plus the
//! engine's tunables, and serializes transaction-open against itself.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::transaction::{self, Transaction};
use crate::vacuum;
use sqlx::PgPool;
use tokio::sync::Mutex;

/// Owns the metadata pool (transactions/locks/paths) and the application
/// pool (versioned user tables), plus an internal mutex serializing
/// transaction opens so id allocation and snapshot setup never race
/// against another `open_tx` call on the same engine.
pub struct Engine {
    metadata_pool: PgPool,
    app_pool: PgPool,
    config: EngineConfig,
    open_guard: Mutex<()>,
}

impl Engine {
    pub fn new(metadata_pool: PgPool, app_pool: PgPool, config: EngineConfig) -> Self {
        Self {
            metadata_pool,
            app_pool,
            config,
            open_guard: Mutex::new(()),
        }
    }

    /// Open a new transaction. Serialized against other `open_tx` calls on
    /// this same engine instance.
    pub async fn open_tx(&self) -> Result<Transaction> {
        let _guard = self.open_guard.lock().await;
        transaction::open(&self.metadata_pool, &self.app_pool, self.config.clone()).await
    }

    /// Reclaim dead row versions across every application table.
    pub async fn vacuum_all(&self) -> Result<u64> {
        vacuum::vacuum_all(&self.metadata_pool, &self.app_pool).await
    }

    /// Reclaim dead row versions in a single application table.
    pub async fn vacuum_table(&self, table: &str) -> Result<u64> {
        vacuum::vacuum_table(&self.metadata_pool, &self.app_pool, table).await
    }

    pub fn metadata_pool(&self) -> &PgPool {
        &self.metadata_pool
    }

    pub fn app_pool(&self) -> &PgPool {
        &self.app_pool
    }
}
