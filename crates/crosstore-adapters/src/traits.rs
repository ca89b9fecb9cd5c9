//! The adapter capability set and transaction handle.
//!
//! Every backend variant implements [`Adapter`], translating the
//! backend-neutral operation set into native driver calls. The adapter owns
//! its opaque native handle (pool, client, or file handle) exclusively: the
//! handle is created by `connect()`, mutated only by `connect()`/`close()`,
//! and destroyed on `close()`. No other component holds it.

use async_trait::async_trait;
use serde_json::Value;

use crosstore_core::{InsertOutcome, QueryDescriptor, RawOutcome, Row, StoreResult, TableDef};

/// The universal backend interface.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Backend name used in normalized error messages (`"sqlite"`,
    /// `"postgres"`, `"mysql"`, `"mongodb"`, `"redis"`).
    fn backend(&self) -> &'static str;

    /// Establish the native connection (pool, client, or file handle).
    /// Idempotent when already connected.
    async fn connect(&mut self) -> StoreResult<()>;

    /// Release the native handle. Subsequent operations fail until
    /// `connect()` is called again.
    async fn close(&mut self) -> StoreResult<()>;

    /// Whether `connect()` has succeeded and `close()` has not been called.
    fn is_connected(&self) -> bool;

    /// Read rows matching the descriptor.
    async fn select(&self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>>;

    /// Count rows matching the descriptor's predicates. Ordering and paging
    /// in the descriptor are ignored.
    async fn count(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64>;

    /// Insert one row; returns the generated or supplied identifier plus the
    /// affected-count.
    async fn insert(&self, table: &str, row: Row) -> StoreResult<InsertOutcome>;

    /// Apply `changes` to all rows matching the descriptor; returns the
    /// affected-count.
    async fn update(&self, table: &str, changes: Row, query: &QueryDescriptor)
        -> StoreResult<u64>;

    /// Delete all rows matching the descriptor; returns the affected-count.
    async fn delete(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64>;

    /// Insert-or-update keyed by `unique_key`, as a single conditional write
    /// wherever the backend can express one. The SQL variants require a
    /// unique constraint on the key column.
    async fn upsert(&self, table: &str, row: Row, unique_key: &str) -> StoreResult<InsertOutcome>;

    /// Raw-query escape hatch. Reads return rows; writes return an
    /// affected-count. SQL variants accept `?` placeholders; MongoDB
    /// interprets `query` as a `runCommand` JSON document; Redis interprets
    /// it as a command name with `params` as arguments.
    async fn raw(&self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome>;

    /// Create a table/collection/namespace from the shared definition
    /// vocabulary. A no-op if the target already exists.
    async fn create_table(&self, table: &TableDef) -> StoreResult<()>;

    /// Drop a table/collection/namespace. A no-op if the target is absent.
    async fn drop_table(&self, table: &str) -> StoreResult<()>;

    /// Open a backend-native transaction scope.
    async fn begin(&self) -> StoreResult<Box<dyn TxHandle>>;
}

/// The CRUD surface bound to one live transaction.
///
/// Semantics differ by backend and are preserved, not unified away:
/// SQL variants and MongoDB roll back on [`TxHandle::rollback`]; the Redis
/// variant executes commands as they are issued and **cannot undo them**;
/// its `rollback` only logs the gap.
#[async_trait]
pub trait TxHandle: Send {
    async fn select(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>>;

    async fn count(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<u64>;

    async fn insert(&mut self, table: &str, row: Row) -> StoreResult<InsertOutcome>;

    async fn update(
        &mut self,
        table: &str,
        changes: Row,
        query: &QueryDescriptor,
    ) -> StoreResult<u64>;

    async fn delete(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<u64>;

    async fn upsert(
        &mut self,
        table: &str,
        row: Row,
        unique_key: &str,
    ) -> StoreResult<InsertOutcome>;

    async fn raw(&mut self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome>;

    async fn create_table(&mut self, table: &TableDef) -> StoreResult<()>;

    async fn drop_table(&mut self, table: &str) -> StoreResult<()>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
