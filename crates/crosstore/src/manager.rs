//! Connection manager: owns exactly one active adapter for the process.
//!
//! The manager resolves the configured driver through the closed registry at
//! `connect()` time, gates every operation on a live connection, and owns
//! the transaction boundary. It is an explicitly constructed instance meant
//! to be passed by reference: there is no global singleton, so tests and
//! multi-store deployments (primary + cache) can hold several managers with
//! deterministic teardown.

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crosstore_adapters::{registry, Adapter, TxHandle};
use crosstore_core::{
    InsertOutcome, QueryDescriptor, RawOutcome, Row, StoreConfig, StoreError, StoreResult,
    TableDef,
};

/// Owns the single active adapter and delegates the CRUD surface to it.
pub struct ConnectionManager {
    config: StoreConfig,
    adapter: RwLock<Option<Box<dyn Adapter>>>,
}

impl ConnectionManager {
    /// Build a manager for the given configuration. No connection is made
    /// until [`ConnectionManager::connect`].
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            adapter: RwLock::new(None),
        }
    }

    /// The immutable configuration this manager was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Resolve the driver and establish the native connection. Idempotent
    /// when already connected.
    pub async fn connect(&self) -> StoreResult<()> {
        let mut guard = self.adapter.write().await;
        if guard.as_ref().is_some_and(|a| a.is_connected()) {
            return Ok(());
        }

        let mut adapter = registry::open(self.config.clone())?;
        adapter.connect().await?;
        info!(driver = %self.config.driver, "store connected");
        *guard = Some(adapter);
        Ok(())
    }

    /// Release the native handle. Operations fail with `NotConnected` until
    /// `connect()` is called again.
    pub async fn close(&self) -> StoreResult<()> {
        let mut guard = self.adapter.write().await;
        if let Some(mut adapter) = guard.take() {
            adapter.close().await?;
            info!(driver = %self.config.driver, "store closed");
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.adapter
            .read()
            .await
            .as_ref()
            .is_some_and(|a| a.is_connected())
    }

    // ── CRUD delegation ──────────────────────────────────────────────

    pub async fn select(&self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.select(table, query).await
    }

    pub async fn count(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.count(table, query).await
    }

    pub async fn insert(&self, table: &str, row: Row) -> StoreResult<InsertOutcome> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.insert(table, row).await
    }

    pub async fn update(
        &self,
        table: &str,
        changes: Row,
        query: &QueryDescriptor,
    ) -> StoreResult<u64> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.update(table, changes, query).await
    }

    pub async fn delete(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.delete(table, query).await
    }

    pub async fn upsert(
        &self,
        table: &str,
        row: Row,
        unique_key: &str,
    ) -> StoreResult<InsertOutcome> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.upsert(table, row, unique_key).await
    }

    pub async fn raw(&self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.raw(query, params).await
    }

    pub async fn create_table(&self, table: &TableDef) -> StoreResult<()> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.create_table(table).await
    }

    pub async fn drop_table(&self, table: &str) -> StoreResult<()> {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        adapter.drop_table(table).await
    }

    // ── transactions ─────────────────────────────────────────────────

    /// Run `f` inside a backend-native transaction scope.
    ///
    /// Commits on `Ok`, rolls back and returns
    /// [`StoreError::TransactionAborted`] wrapping the original cause on
    /// `Err`. The Redis backend cannot undo executed commands; its rollback
    /// is a logged no-op and partial writes persist.
    pub async fn transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn TxHandle) -> BoxFuture<'t, StoreResult<T>> + Send,
    {
        let guard = self.adapter.read().await;
        let adapter = guard.as_ref().ok_or(StoreError::NotConnected)?;
        let mut tx = adapter.begin().await?;

        match f(tx.as_mut()).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(cause) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback itself failed");
                }
                Err(StoreError::aborted(cause))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_require_connect() {
        let manager = ConnectionManager::new(StoreConfig::sqlite(":memory:"));
        let err = manager
            .select("t", &QueryDescriptor::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let manager = ConnectionManager::new(StoreConfig::sqlite(":memory:"));
        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert!(manager.is_connected().await);

        manager.close().await.unwrap();
        assert!(!manager.is_connected().await);
        let err = manager.raw("SELECT 1", vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));
    }

    #[tokio::test]
    async fn transaction_wraps_the_original_cause() {
        let manager = ConnectionManager::new(StoreConfig::sqlite(":memory:"));
        manager.connect().await.unwrap();

        let err = manager
            .transaction::<(), _>(|_tx| {
                Box::pin(async { Err(StoreError::Config("boom".into())) })
            })
            .await
            .unwrap_err();
        match err {
            StoreError::TransactionAborted { source } => {
                assert!(matches!(*source, StoreError::Config(_)));
            }
            other => panic!("expected TransactionAborted, got {other}"),
        }
    }
}
