//! Migration manager integration tests against a real SQLite database.

use async_trait::async_trait;
use crosstore::{
    row, ColumnDef, Migration, MigrationRegistry, MigrationState, Store, StoreConfig, StoreResult,
    TableDef, TxHandle,
};

struct CreateUsers;

#[async_trait]
impl Migration for CreateUsers {
    fn name(&self) -> &str {
        "20240101000000_create_users"
    }

    async fn up(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.create_table(&TableDef::new(
            "users",
            vec![ColumnDef::increments("id"), ColumnDef::string("name")],
        ))
        .await
    }

    async fn down(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.drop_table("users").await
    }
}

struct CreatePosts;

#[async_trait]
impl Migration for CreatePosts {
    fn name(&self) -> &str {
        "20240102000000_create_posts"
    }

    async fn up(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.create_table(&TableDef::new(
            "posts",
            vec![
                ColumnDef::increments("id"),
                ColumnDef::string("title"),
                ColumnDef::integer("user_id").indexed(),
            ],
        ))
        .await
    }

    async fn down(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.drop_table("posts").await
    }
}

struct SeedAdmin;

#[async_trait]
impl Migration for SeedAdmin {
    fn name(&self) -> &str {
        "20240103000000_seed_admin"
    }

    async fn up(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.insert("users", row!({"name": "admin"})).await?;
        Ok(())
    }

    async fn down(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        let mut filter = crosstore::QueryDescriptor::new();
        filter.filter.push((
            "name".into(),
            crosstore::Predicate::Eq(serde_json::json!("admin")),
        ));
        tx.delete("users", &filter).await?;
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl Migration for Failing {
    fn name(&self) -> &str {
        "20240104000000_failing"
    }

    async fn up(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        // Write something first so rollback has work to undo.
        tx.insert("users", row!({"name": "ghost"})).await?;
        tx.raw("THIS IS NOT SQL", vec![]).await?;
        Ok(())
    }

    async fn down(&self, _tx: &mut dyn TxHandle) -> StoreResult<()> {
        Ok(())
    }
}

fn base_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    registry.register(Box::new(CreateUsers)).unwrap();
    registry.register(Box::new(CreatePosts)).unwrap();
    registry
}

async fn open_store() -> Store {
    Store::open(StoreConfig::sqlite(":memory:")).await.unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  up / idempotence / status
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn up_applies_pending_in_name_order_and_is_idempotent() {
    let store = open_store().await;
    let migrator = store.migrator(base_registry());

    let applied = migrator.up().await.unwrap();
    assert_eq!(
        applied,
        vec!["20240101000000_create_users", "20240102000000_create_posts"]
    );

    // The migrated tables exist and are usable.
    store.table("users").insert(row!({"name": "ada"})).await.unwrap();
    assert_eq!(store.table("users").count().await.unwrap(), 1);

    // Second run applies nothing.
    let applied_again = migrator.up().await.unwrap();
    assert!(applied_again.is_empty());

    let status = migrator.status().await.unwrap();
    assert_eq!(status.len(), 2);
    for line in status {
        assert_eq!(line.state, MigrationState::Applied { batch: 1 });
    }
}

#[tokio::test]
async fn status_lists_pending_before_up() {
    let store = open_store().await;
    let migrator = store.migrator(base_registry());

    let status = migrator.status().await.unwrap();
    assert_eq!(status.len(), 2);
    for line in status {
        assert_eq!(line.state, MigrationState::Pending);
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  batches / down
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn successive_up_runs_get_increasing_batches_and_down_pops_the_last() {
    let store = open_store().await;

    // First batch.
    store.migrator(base_registry()).up().await.unwrap();

    // Second batch adds the seed migration.
    let mut registry = base_registry();
    registry.register(Box::new(SeedAdmin)).unwrap();
    let migrator = store.migrator(registry);
    let applied = migrator.up().await.unwrap();
    assert_eq!(applied, vec!["20240103000000_seed_admin"]);
    assert_eq!(store.table("users").count().await.unwrap(), 1);

    let status = migrator.status().await.unwrap();
    let batches: Vec<_> = status.iter().map(|s| s.state.clone()).collect();
    assert_eq!(
        batches,
        vec![
            MigrationState::Applied { batch: 1 },
            MigrationState::Applied { batch: 1 },
            MigrationState::Applied { batch: 2 },
        ]
    );

    // down() rolls back only the most recent batch.
    let rolled_back = migrator.down().await.unwrap();
    assert_eq!(rolled_back, vec!["20240103000000_seed_admin"]);
    assert_eq!(store.table("users").count().await.unwrap(), 0);

    let status = migrator.status().await.unwrap();
    assert_eq!(
        status.iter().filter(|s| s.state == MigrationState::Pending).count(),
        1
    );

    // A later up() computes its batch from what is still tracked.
    let applied = migrator.up().await.unwrap();
    assert_eq!(applied, vec!["20240103000000_seed_admin"]);
    let status = migrator.status().await.unwrap();
    assert!(status
        .iter()
        .any(|s| s.state == MigrationState::Applied { batch: 2 }));
}

#[tokio::test]
async fn failing_migration_rolls_back_and_reports_its_name() {
    let store = open_store().await;

    let mut registry = base_registry();
    registry.register(Box::new(Failing)).unwrap();
    let migrator = store.migrator(registry);

    let err = migrator.up().await.unwrap_err();
    match err {
        crosstore::StoreError::Migration { name, .. } => {
            assert_eq!(name, "20240104000000_failing");
        }
        other => panic!("expected Migration error, got {other}"),
    }

    // The failing migration's partial write was rolled back, and its
    // tracking record was never inserted.
    assert_eq!(store.table("users").count().await.unwrap(), 0);
    let status = migrator.status().await.unwrap();
    let failing = status
        .iter()
        .find(|s| s.name == "20240104000000_failing")
        .unwrap();
    assert_eq!(failing.state, MigrationState::Pending);

    // Earlier migrations in the run did apply (per-migration transactions).
    let users_status = status
        .iter()
        .find(|s| s.name == "20240101000000_create_users")
        .unwrap();
    assert!(matches!(users_status.state, MigrationState::Applied { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
//  reset
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reset_rolls_everything_back_and_clears_tracking() {
    let store = open_store().await;

    let mut registry = base_registry();
    registry.register(Box::new(SeedAdmin)).unwrap();
    let migrator = store.migrator(registry);
    migrator.up().await.unwrap();
    assert_eq!(store.table("users").count().await.unwrap(), 1);

    migrator.reset().await.unwrap();

    let status = migrator.status().await.unwrap();
    assert!(status.iter().all(|s| s.state == MigrationState::Pending));

    // Everything was rolled back: re-running up() starts from scratch at
    // batch 1... but on a tracking store that was fully cleared.
    let applied = migrator.up().await.unwrap();
    assert_eq!(applied.len(), 3);
}

// ═══════════════════════════════════════════════════════════════════════
//  create()
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_writes_a_timestamped_skeleton() {
    let store = open_store().await;
    let migrator = store.migrator(MigrationRegistry::new());

    let dir = tempfile::tempdir().unwrap();
    let path = migrator.create(dir.path(), "Add Comments Table").unwrap();

    let file_name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.ends_with("_add_comments_table.rs"));
    // 14-digit timestamp prefix.
    let stamp = file_name.split('_').next().unwrap();
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));

    let body = std::fs::read_to_string(&path).unwrap();
    assert!(body.contains("impl Migration for AddCommentsTable"));
}
