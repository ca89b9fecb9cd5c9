//! Schema migrations with batch tracking.
//!
//! Migrations are Rust values registered in a [`MigrationRegistry`]; each
//! carries a `<14-digit-timestamp>_<slug>` name that fixes its position in
//! the application order. Applied migrations are tracked in a `_migrations`
//! table (or collection / key namespace) managed through the active
//! adapter's own operations, so tracking behaves identically on every
//! backend.
//!
//! Batch numbers strictly increase across successive `up()` runs and are
//! never reused after a `down()`. Running migrations from more than one
//! process at a time is not supported: there is no advisory lock around the
//! batch-number computation, so concurrent `up()` runs can race. Run
//! migrations from exactly one process.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crosstore_adapters::TxHandle;
use crosstore_core::{
    ColumnDef, Predicate, QueryDescriptor, Row, StoreError, StoreResult, TableDef,
};

use crate::manager::ConnectionManager;

/// Name of the tracking table/collection/namespace.
pub const TRACKING_TABLE: &str = "_migrations";

// ---------------------------------------------------------------------------
// Migration trait and registry
// ---------------------------------------------------------------------------

/// One schema migration.
///
/// `up` and `down` receive the CRUD/DDL surface bound to the transaction
/// that also records (or deletes) the tracking row, so a failing migration
/// leaves no half-applied state on transactional backends.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique name, `<14-digit-timestamp>_<slug>` (e.g.
    /// `20240101120000_create_users`). Names sort chronologically.
    fn name(&self) -> &str;

    async fn up(&self, tx: &mut dyn TxHandle) -> StoreResult<()>;

    async fn down(&self, tx: &mut dyn TxHandle) -> StoreResult<()>;
}

/// An ordered, duplicate-free set of registered migrations.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Arc<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration. Duplicate names are rejected.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> StoreResult<()> {
        let name = migration.name().to_string();
        if self.migrations.iter().any(|m| m.name() == name) {
            return Err(StoreError::Migration {
                name,
                message: "registered twice".into(),
            });
        }
        self.migrations.push(Arc::from(migration));
        self.migrations.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Registered migrations in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Migration> {
        self.migrations.iter().map(|m| &**m)
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Migration>> {
        self.migrations
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Status reporting
// ---------------------------------------------------------------------------

/// The tracked state of one migration name.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationState {
    /// Applied in the given batch.
    Applied { batch: i64 },
    /// Registered but not yet applied.
    Pending,
    /// Present in the tracking store but missing from the registry.
    Orphaned { batch: i64 },
}

/// One line of `status()` output.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatus {
    pub name: String,
    pub state: MigrationState,
}

/// A tracking record as read back from the store.
#[derive(Debug, Clone)]
struct TrackedMigration {
    name: String,
    batch: i64,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Applies and rolls back migrations in monotonically increasing batches.
pub struct MigrationManager<'a> {
    manager: &'a ConnectionManager,
    registry: MigrationRegistry,
}

impl<'a> MigrationManager<'a> {
    pub fn new(manager: &'a ConnectionManager, registry: MigrationRegistry) -> Self {
        Self { manager, registry }
    }

    /// Create the tracking table if it does not exist.
    async fn ensure_tracking_table(&self) -> StoreResult<()> {
        self.manager
            .create_table(&TableDef::new(
                TRACKING_TABLE,
                vec![
                    ColumnDef::increments("id"),
                    ColumnDef::string("name").unique(),
                    ColumnDef::integer("batch").indexed(),
                    ColumnDef::string("applied_at"),
                ],
            ))
            .await
    }

    /// All tracking records, unordered.
    async fn tracked(&self) -> StoreResult<Vec<TrackedMigration>> {
        let rows = self
            .manager
            .select(TRACKING_TABLE, &QueryDescriptor::new())
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let name = match row.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let batch = row.get("batch").and_then(Value::as_i64).unwrap_or(0);
            records.push(TrackedMigration { name, batch });
        }
        Ok(records)
    }

    /// Apply every pending migration; returns the applied names in order.
    ///
    /// The whole run shares one batch number, `max(existing) + 1`. Each
    /// migration executes inside one transaction that runs its `up` and
    /// inserts its tracking record. Running `up()` twice in a row applies
    /// nothing the second time.
    pub async fn up(&self) -> StoreResult<Vec<String>> {
        self.ensure_tracking_table().await?;

        let tracked = self.tracked().await?;
        let applied: HashSet<&str> = tracked.iter().map(|r| r.name.as_str()).collect();
        let batch = tracked.iter().map(|r| r.batch).max().unwrap_or(0) + 1;

        let pending: Vec<Arc<dyn Migration>> = self
            .registry
            .migrations
            .iter()
            .filter(|m| !applied.contains(m.name()))
            .cloned()
            .collect();

        if pending.is_empty() {
            info!("no pending migrations");
            return Ok(Vec::new());
        }
        info!(pending = pending.len(), batch, "applying migrations");

        let mut applied_now = Vec::with_capacity(pending.len());
        for migration in pending {
            let name = migration.name().to_string();
            let applied_at = chrono::Utc::now().to_rfc3339();

            let record_name = name.clone();
            self.manager
                .transaction(|tx| {
                    Box::pin(async move {
                        migration.up(tx).await?;

                        let mut record = Row::new();
                        record.insert("name".into(), Value::String(record_name));
                        record.insert("batch".into(), Value::from(batch));
                        record.insert("applied_at".into(), Value::String(applied_at));
                        tx.insert(TRACKING_TABLE, record).await?;
                        Ok(())
                    })
                })
                .await
                .map_err(|e| StoreError::Migration {
                    name: name.clone(),
                    message: e.to_string(),
                })?;

            info!(migration = %name, batch, "migration applied");
            applied_now.push(name);
        }
        Ok(applied_now)
    }

    /// Roll back the most recent batch; returns the rolled-back names in
    /// execution (reverse-application) order.
    ///
    /// The first failing rollback aborts the remaining ones in the batch;
    /// the batch is then partially rolled back, which `status()` reflects.
    pub async fn down(&self) -> StoreResult<Vec<String>> {
        self.ensure_tracking_table().await?;

        let tracked = self.tracked().await?;
        let Some(last_batch) = tracked.iter().map(|r| r.batch).max() else {
            info!("nothing to roll back");
            return Ok(Vec::new());
        };

        let mut batch_records: Vec<&TrackedMigration> =
            tracked.iter().filter(|r| r.batch == last_batch).collect();
        // Reverse application order: names sort chronologically.
        batch_records.sort_by(|a, b| b.name.cmp(&a.name));

        info!(batch = last_batch, count = batch_records.len(), "rolling back batch");

        let mut rolled_back = Vec::with_capacity(batch_records.len());
        for record in batch_records {
            self.roll_back_one(&record.name).await?;
            rolled_back.push(record.name.clone());
        }
        Ok(rolled_back)
    }

    /// Roll back one tracked migration inside a transaction that also
    /// deletes its tracking record.
    async fn roll_back_one(&self, name: &str) -> StoreResult<()> {
        let migration = self.registry.get(name).ok_or_else(|| StoreError::Migration {
            name: name.to_string(),
            message: "tracked in the store but not registered".into(),
        })?;

        let record_name = name.to_string();
        self.manager
            .transaction(|tx| {
                Box::pin(async move {
                    migration.down(tx).await?;

                    let mut filter = QueryDescriptor::new();
                    filter
                        .filter
                        .push(("name".into(), Predicate::Eq(Value::String(record_name))));
                    tx.delete(TRACKING_TABLE, &filter).await?;
                    Ok(())
                })
            })
            .await
            .map_err(|e| StoreError::Migration {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        info!(migration = %name, "migration rolled back");
        Ok(())
    }

    /// Every registered migration as applied or pending, plus any tracking
    /// records whose migration is no longer registered.
    pub async fn status(&self) -> StoreResult<Vec<MigrationStatus>> {
        self.ensure_tracking_table().await?;
        let tracked = self.tracked().await?;

        let mut statuses: Vec<MigrationStatus> = self
            .registry
            .iter()
            .map(|migration| {
                let state = tracked
                    .iter()
                    .find(|r| r.name == migration.name())
                    .map(|r| MigrationState::Applied { batch: r.batch })
                    .unwrap_or(MigrationState::Pending);
                MigrationStatus {
                    name: migration.name().to_string(),
                    state,
                }
            })
            .collect();

        for record in &tracked {
            if self.registry.get(&record.name).is_none() {
                statuses.push(MigrationStatus {
                    name: record.name.clone(),
                    state: MigrationState::Orphaned {
                        batch: record.batch,
                    },
                });
            }
        }

        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(statuses)
    }

    /// Roll every tracked migration back in reverse-chronological order,
    /// tolerating (logging, not raising) individual failures, then clear
    /// the tracking store entirely.
    pub async fn reset(&self) -> StoreResult<()> {
        self.ensure_tracking_table().await?;

        let mut tracked = self.tracked().await?;
        tracked.sort_by(|a, b| b.batch.cmp(&a.batch).then(b.name.cmp(&a.name)));

        for record in &tracked {
            if let Err(e) = self.roll_back_one(&record.name).await {
                warn!(migration = %record.name, error = %e, "rollback failed during reset, continuing");
            }
        }

        self.manager
            .delete(TRACKING_TABLE, &QueryDescriptor::new())
            .await?;
        info!("migration tracking store cleared");
        Ok(())
    }

    /// Generate a timestamped skeleton source file for a new migration in
    /// `directory`, returning its path.
    pub fn create(&self, directory: &std::path::Path, name: &str) -> StoreResult<std::path::PathBuf> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(StoreError::Config("migration name must not be empty".into()));
        }

        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let full_name = format!("{stamp}_{slug}");
        let path = directory.join(format!("{full_name}.rs"));

        std::fs::create_dir_all(directory)
            .map_err(|e| StoreError::Config(format!("cannot create {}: {e}", directory.display())))?;
        std::fs::write(&path, skeleton(&full_name, &slug))
            .map_err(|e| StoreError::Config(format!("cannot write {}: {e}", path.display())))?;

        info!(path = %path.display(), "migration skeleton created");
        Ok(path)
    }
}

/// Lowercase, alphanumeric-and-underscore slug.
fn slugify(name: &str) -> String {
    let mut slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    slug.trim_matches('_').to_string()
}

fn skeleton(full_name: &str, slug: &str) -> String {
    let type_name: String = slug
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();

    format!(
        r#"use async_trait::async_trait;
use crosstore::{{Migration, StoreResult, TxHandle}};

pub struct {type_name};

#[async_trait]
impl Migration for {type_name} {{
    fn name(&self) -> &str {{
        "{full_name}"
    }}

    async fn up(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {{
        // tx.create_table(&TableDef::new(...)).await?;
        let _ = tx;
        Ok(())
    }}

    async fn down(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {{
        // tx.drop_table("...").await?;
        let _ = tx;
        Ok(())
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl Migration for Noop {
        fn name(&self) -> &str {
            self.0
        }
        async fn up(&self, _tx: &mut dyn TxHandle) -> StoreResult<()> {
            Ok(())
        }
        async fn down(&self, _tx: &mut dyn TxHandle) -> StoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_orders_by_name_and_rejects_duplicates() {
        let mut registry = MigrationRegistry::new();
        registry
            .register(Box::new(Noop("20240202000000_second")))
            .unwrap();
        registry
            .register(Box::new(Noop("20240101000000_first")))
            .unwrap();

        let names: Vec<&str> = registry.iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            vec!["20240101000000_first", "20240202000000_second"]
        );

        let err = registry
            .register(Box::new(Noop("20240101000000_first")))
            .unwrap_err();
        assert!(matches!(err, StoreError::Migration { .. }));
    }

    #[test]
    fn slugify_normalizes() {
        assert_eq!(slugify("Create Users Table"), "create_users_table");
        assert_eq!(slugify("add--index!!"), "add_index");
        assert_eq!(slugify("___"), "");
    }

    #[test]
    fn skeleton_contains_name_and_type() {
        let source = skeleton("20240101000000_create_users", "create_users");
        assert!(source.contains("\"20240101000000_create_users\""));
        assert!(source.contains("pub struct CreateUsers;"));
        assert!(source.contains("impl Migration for CreateUsers"));
    }
}
