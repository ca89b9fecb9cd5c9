//! # crosstore
//!
//! Polyglot database abstraction layer: one client-facing API for CRUD,
//! raw queries, transactions, and schema migrations against five
//! heterogeneous backends: PostgreSQL and MySQL (pooled SQL), SQLite
//! (embedded SQL), MongoDB (documents), and Redis (key-value).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Store (table / raw / transaction / migrator) │
//! ├──────────────────────────────────────────────┤
//! │  QueryBuilder (fluent → QueryDescriptor)      │
//! │  MigrationManager (batched up/down/status)    │
//! ├──────────────────────────────────────────────┤
//! │  ConnectionManager (one active adapter)       │
//! ├──────────────────────────────────────────────┤
//! │  Adapter: sqlite | postgres | mysql           │
//! │           | mongodb | redis                   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use crosstore::{Store, StoreConfig};
//! use serde_json::json;
//!
//! let store = Store::open(StoreConfig::sqlite("data/app.db")).await?;
//! store
//!     .table("users")
//!     .insert(crosstore::row!({"name": "Ada", "active": true}))
//!     .await?;
//! let active = store.table("users").filter("active", true).get().await?;
//! store.close().await?;
//! ```
//!
//! Concurrency correctness is delegated to the backends; this layer adds no
//! locks and no automatic retries. Read-then-write sequences get no
//! cross-call isolation: wrap them in [`Store::transaction`].

pub mod builder;
pub mod manager;
pub mod migrate;
pub mod store;

// ── re-exports ───────────────────────────────────────────────────────

pub use builder::QueryBuilder;
pub use manager::ConnectionManager;
pub use migrate::{
    Migration, MigrationManager, MigrationRegistry, MigrationState, MigrationStatus,
};
pub use store::{Store, TxClient};

pub use crosstore_adapters::{registry, Adapter, TxHandle};
pub use crosstore_core::{
    CmpOp, ColumnDef, ColumnKind, Direction, Driver, DriverOptions, InsertOutcome, Ordering,
    Predicate, QueryDescriptor, RawOutcome, Row, StoreConfig, StoreError, StoreResult, TableDef,
};

/// Build a [`Row`] from a JSON object literal.
///
/// ```ignore
/// let row = crosstore::row!({"name": "Ada", "views": 3});
/// ```
#[macro_export]
macro_rules! row {
    ($($json:tt)+) => {
        $crate::row_from_value(::serde_json::json!($($json)+))
    };
}

pub use crosstore_core::row::row_from_value;
