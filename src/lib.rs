//! Transaction engine
//!
//! A user-level MVCC transaction manager layered over two PostgreSQL
//! databases: one holding transaction/lock/dependency-graph metadata, the
//! other holding versioned application rows.
//!
//! ## Architecture
//!
//! - **Visibility** (`visibility`): the pure predicate deciding whether a
//!   row version is visible to a given transaction's snapshot.
//! - **Version store** (`version_store`): SQL-level insert/update/delete/
//!   select/where over versioned application tables.
//! - **Lock table** (`lock_table`): row-level locking with wait-and-retry.
//! - **Dependency graph** (`dependency_graph`): wait-for tracking and cycle
//!   detection backed by Postgres `ltree`.
//! - **Transaction coordinator** (`transaction`): ties the above together
//!   behind `open`/`commit`/`rollback`.
//! - **Vacuum** (`vacuum`): reclaims superseded row versions.
//! - **Engine** (`engine`): the facade most callers use directly.
//!
//! ## Usage
//!
//! ```no_run
//! use txn_engine::{Engine, EngineConfig, Value};
//! use sqlx::postgres::PgPoolOptions;
//!
//! # async fn example() -> txn_engine::Result<()> {
//! let metadata_pool = PgPoolOptions::new().connect("postgres://localhost/meta").await.unwrap();
//! let app_pool = PgPoolOptions::new().connect("postgres://localhost/app").await.unwrap();
//! let engine = Engine::new(metadata_pool, app_pool, EngineConfig::default());
//!
//! let mut tx = engine.open_tx().await?;
//! let id = tx.insert("widgets", &["name".into()], &[Value::Text("sprocket".into())]).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dependency_graph;
pub mod engine;
pub mod error;
pub mod lock_table;
pub mod schema;
pub mod transaction;
pub mod vacuum;
pub mod value;
pub mod version_store;
pub mod visibility;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use transaction::{Status, Transaction};
pub use value::{Payload, Value};

/// Version information, for logging/diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
