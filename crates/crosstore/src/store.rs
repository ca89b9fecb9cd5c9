//! The facade application code imports.
//!
//! A [`Store`] owns one [`ConnectionManager`] and exposes the three entry
//! points business logic consumes (`table()`, `raw()`, `transaction()`)
//! plus schema DDL passthroughs and the migration manager accessor. It is
//! an explicit instance: construct as many stores as you have backends
//! (e.g. a SQL primary plus a Redis cache) and pass them by reference.

use futures::future::BoxFuture;
use serde_json::Value;

use crosstore_adapters::TxHandle;
use crosstore_core::{RawOutcome, StoreConfig, StoreResult, TableDef};

use crate::builder::QueryBuilder;
use crate::manager::ConnectionManager;
use crate::migrate::{MigrationManager, MigrationRegistry};

/// Process-wide handle to one configured backend.
pub struct Store {
    manager: ConnectionManager,
}

impl Store {
    /// Construct and connect in one step.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        let manager = ConnectionManager::new(config);
        manager.connect().await?;
        Ok(Self { manager })
    }

    /// Construct without connecting; call [`ConnectionManager::connect`]
    /// through [`Store::manager`] later.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            manager: ConnectionManager::new(config),
        }
    }

    /// The underlying connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Entry point for all structured CRUD on one table.
    pub fn table(&self, name: impl Into<String>) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.manager, name)
    }

    /// Raw-query escape hatch. Reads return rows; writes return an
    /// affected-count.
    pub async fn raw(&self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome> {
        self.manager.raw(query, params).await
    }

    /// Run `f` inside a backend-native transaction. The client passed to
    /// `f` exposes the same `table`/`raw` surface bound to the transaction.
    /// Commits on `Ok`; rolls back and wraps the cause on `Err`.
    pub async fn transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(TxClient<'t>) -> BoxFuture<'t, StoreResult<T>> + Send,
    {
        self.manager
            .transaction(move |tx| f(TxClient { handle: tx }))
            .await
    }

    pub async fn create_table(&self, table: &TableDef) -> StoreResult<()> {
        self.manager.create_table(table).await
    }

    pub async fn drop_table(&self, table: &str) -> StoreResult<()> {
        self.manager.drop_table(table).await
    }

    /// The migration manager for this store, with `registry` supplying the
    /// known migrations.
    pub fn migrator(&self, registry: MigrationRegistry) -> MigrationManager<'_> {
        MigrationManager::new(&self.manager, registry)
    }

    /// Release the native connection.
    pub async fn close(&self) -> StoreResult<()> {
        self.manager.close().await
    }
}

/// The transaction-scoped client handed to [`Store::transaction`]
/// callbacks: the same `table`/`raw` surface, bound to the live
/// transaction.
pub struct TxClient<'t> {
    handle: &'t mut dyn TxHandle,
}

impl<'t> TxClient<'t> {
    /// Structured CRUD on one table, inside the transaction.
    pub fn table(&mut self, name: impl Into<String>) -> QueryBuilder<'_> {
        QueryBuilder::for_tx(&mut *self.handle, name)
    }

    /// Raw query inside the transaction.
    pub async fn raw(&mut self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome> {
        self.handle.raw(query, params).await
    }

    pub async fn create_table(&mut self, table: &TableDef) -> StoreResult<()> {
        self.handle.create_table(table).await
    }

    pub async fn drop_table(&mut self, table: &str) -> StoreResult<()> {
        self.handle.drop_table(table).await
    }
}
