//! The migration registry compiled into the `crosstore` binary.
//!
//! Applications embed their own migrations the same way: one type per
//! migration, registered in name order. Add new migrations to the end of
//! [`registry`]; never edit an applied migration: write a new one.

use async_trait::async_trait;
use crosstore::{ColumnDef, Migration, MigrationRegistry, StoreResult, TableDef, TxHandle};

/// All migrations known to this binary.
pub fn registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    // register() only fails on duplicate names, which would be a bug in
    // this list.
    registry
        .register(Box::new(CreateUsers))
        .expect("duplicate migration name");
    registry
        .register(Box::new(CreateJobs))
        .expect("duplicate migration name");
    registry
}

struct CreateUsers;

#[async_trait]
impl Migration for CreateUsers {
    fn name(&self) -> &str {
        "20240115093000_create_users"
    }

    async fn up(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.create_table(&TableDef::new(
            "users",
            vec![
                ColumnDef::increments("id"),
                ColumnDef::string("email").unique(),
                ColumnDef::string("name"),
                ColumnDef::boolean("active").default_value(serde_json::json!(true)),
                ColumnDef::string("created_at").nullable(),
            ],
        ))
        .await
    }

    async fn down(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.drop_table("users").await
    }
}

struct CreateJobs;

#[async_trait]
impl Migration for CreateJobs {
    fn name(&self) -> &str {
        "20240115093500_create_jobs"
    }

    async fn up(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.create_table(&TableDef::new(
            "jobs",
            vec![
                ColumnDef::increments("id"),
                ColumnDef::string("title"),
                ColumnDef::text("description").nullable(),
                ColumnDef::integer("user_id").indexed(),
                ColumnDef::string("status").default_value(serde_json::json!("open")),
                ColumnDef::json("metadata").nullable(),
            ],
        ))
        .await
    }

    async fn down(&self, tx: &mut dyn TxHandle) -> StoreResult<()> {
        tx.drop_table("jobs").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_in_name_order() {
        let registry = registry();
        let names: Vec<&str> = registry.iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            vec!["20240115093000_create_users", "20240115093500_create_jobs"]
        );
    }
}
