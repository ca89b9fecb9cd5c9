//! SQLite adapter: embedded, file-based SQL backend over an sqlx pool.
//!
//! `:memory:` paths are honored for tests; the pool is then capped at one
//! connection so every query sees the same database. SQLite has no boolean
//! storage class, so `BOOLEAN` columns round-trip as `0`/`1` integers unless
//! the column is declared `BOOLEAN` (sqlx then reports the declared type and
//! values decode as real booleans).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tracing::debug;

use crosstore_core::{
    InsertOutcome, QueryDescriptor, RawOutcome, Row, StoreConfig, StoreError, StoreResult,
    TableDef,
};

use crate::sql::{self, Dialect};
use crate::traits::{Adapter, TxHandle};

const BACKEND: &str = "sqlite";
const DIALECT: Dialect = Dialect::Sqlite;

/// SQLite adapter over an sqlx connection pool.
pub struct SqliteAdapter {
    config: StoreConfig,
    pool: Option<SqlitePool>,
}

impl SqliteAdapter {
    pub fn new(config: StoreConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> StoreResult<&SqlitePool> {
        self.pool.as_ref().ok_or(StoreError::NotConnected)
    }
}

// ---------------------------------------------------------------------------
// Value binding and row decoding
// ---------------------------------------------------------------------------

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::String(s) => query.bind(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::Bool(b) => query.bind(*b),
        Value::Null => query.bind(Option::<String>::None),
        // Arrays and objects are stored as JSON text.
        other => query.bind(other.to_string()),
    }
}

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[Value]) -> SqliteQuery<'q> {
    for param in params {
        query = bind_value(query, param);
    }
    query
}

fn decode_row(row: &SqliteRow) -> Row {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_column(row, index));
    }
    out
}

fn decode_column(row: &SqliteRow, index: usize) -> Value {
    if let Ok(raw) = row.try_get_raw(index) {
        if raw.is_null() {
            return Value::Null;
        }
    }
    let declared = row.columns()[index].type_info().name().to_ascii_uppercase();
    if declared == "BOOLEAN" {
        if let Ok(v) = row.try_get::<bool, _>(index) {
            return Value::Bool(v);
        }
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Value::String(v);
    }
    Value::Null
}

// ---------------------------------------------------------------------------
// Operations over a generic executor (pool or transaction)
// ---------------------------------------------------------------------------

async fn run_select<'a, E>(
    executor: E,
    table: &str,
    query: &QueryDescriptor,
) -> StoreResult<Vec<Row>>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let built = sql::select(DIALECT, table, query);
    debug!(table, sql = %built.sql, "sqlite select");
    let rows = bind_all(sqlx::query(&built.sql), &built.params)
        .fetch_all(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "select", e))?;
    Ok(rows.iter().map(decode_row).collect())
}

async fn run_count<'a, E>(executor: E, table: &str, query: &QueryDescriptor) -> StoreResult<u64>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let built = sql::count(DIALECT, table, query);
    let row = bind_all(sqlx::query(&built.sql), &built.params)
        .fetch_one(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "count", e))?;
    let count: i64 = row
        .try_get(0)
        .map_err(|e| StoreError::backend(BACKEND, "count", e))?;
    Ok(count as u64)
}

async fn run_insert<'a, E>(executor: E, table: &str, row: Row) -> StoreResult<InsertOutcome>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let built = sql::insert(DIALECT, table, &row);
    debug!(table, sql = %built.sql, "sqlite insert");
    let result = bind_all(sqlx::query(&built.sql), &built.params)
        .execute(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "insert", e))?;
    Ok(InsertOutcome {
        id: Value::from(result.last_insert_rowid()),
        affected: result.rows_affected(),
    })
}

async fn run_update<'a, E>(
    executor: E,
    table: &str,
    changes: Row,
    query: &QueryDescriptor,
) -> StoreResult<u64>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let built = sql::update(DIALECT, table, &changes, query);
    let result = bind_all(sqlx::query(&built.sql), &built.params)
        .execute(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "update", e))?;
    Ok(result.rows_affected())
}

async fn run_delete<'a, E>(executor: E, table: &str, query: &QueryDescriptor) -> StoreResult<u64>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let built = sql::delete(DIALECT, table, query);
    let result = bind_all(sqlx::query(&built.sql), &built.params)
        .execute(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "delete", e))?;
    Ok(result.rows_affected())
}

async fn run_upsert<'a, E>(
    executor: E,
    table: &str,
    row: Row,
    unique_key: &str,
) -> StoreResult<InsertOutcome>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    let key_value = row.get(unique_key).cloned().unwrap_or(Value::Null);
    let mut built = sql::upsert(DIALECT, table, &row, unique_key);
    built.sql.push_str(" RETURNING *");
    debug!(table, sql = %built.sql, "sqlite upsert");

    let returned = bind_all(sqlx::query(&built.sql), &built.params)
        .fetch_optional(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "upsert", e))?;

    match returned {
        Some(r) => {
            let decoded = decode_row(&r);
            let id = decoded.get("id").cloned().unwrap_or(key_value);
            Ok(InsertOutcome { id, affected: 1 })
        }
        // ON CONFLICT DO NOTHING fired: nothing written.
        None => Ok(InsertOutcome {
            id: key_value,
            affected: 0,
        }),
    }
}

async fn run_raw<'a, E>(executor: E, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    debug!(sql = %query, param_count = params.len(), "sqlite raw");
    if sql::is_read_query(query) {
        let rows = bind_all(sqlx::query(query), &params)
            .fetch_all(executor)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "raw query", e))?;
        Ok(RawOutcome::Rows(rows.iter().map(|r| decode_row(r)).collect()))
    } else {
        let result = bind_all(sqlx::query(query), &params)
            .execute(executor)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "raw query", e))?;
        Ok(RawOutcome::Affected(result.rows_affected()))
    }
}

async fn run_create_table<'a, E>(executor: E, table: &TableDef) -> StoreResult<()>
where
    E: sqlx::Executor<'a, Database = Sqlite> + Copy,
{
    for statement in sql::create_table(DIALECT, table) {
        sqlx::query(&statement)
            .execute(executor)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "create table", e))?;
    }
    Ok(())
}

async fn run_drop_table<'a, E>(executor: E, table: &str) -> StoreResult<()>
where
    E: sqlx::Executor<'a, Database = Sqlite>,
{
    sqlx::query(&sql::drop_table(DIALECT, table))
        .execute(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "drop table", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Adapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Adapter for SqliteAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn connect(&mut self) -> StoreResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        let path = self
            .config
            .path
            .clone()
            .ok_or_else(|| StoreError::Config("sqlite requires a file path".into()))?;
        let in_memory = path.as_os_str() == ":memory:";

        let mut options = SqliteConnectOptions::new().create_if_missing(true);
        options = if in_memory {
            options.in_memory(true)
        } else {
            options.filename(&path)
        };
        options = options.foreign_keys(self.config.options.enable_foreign_keys.unwrap_or(true));
        if let Some(ms) = self.config.options.busy_timeout_ms {
            options = options.busy_timeout(Duration::from_millis(ms));
        }

        // An in-memory database exists per connection; a pool larger than
        // one would hand out empty databases.
        let max_connections = if in_memory {
            1
        } else {
            self.config.options.max_connections.unwrap_or(5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "connect", e))?;

        debug!(path = %path.display(), max_connections, "sqlite connected");
        self.pool = Some(pool);
        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    async fn select(&self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>> {
        run_select(self.pool()?, table, query).await
    }

    async fn count(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        run_count(self.pool()?, table, query).await
    }

    async fn insert(&self, table: &str, row: Row) -> StoreResult<InsertOutcome> {
        run_insert(self.pool()?, table, row).await
    }

    async fn update(
        &self,
        table: &str,
        changes: Row,
        query: &QueryDescriptor,
    ) -> StoreResult<u64> {
        run_update(self.pool()?, table, changes, query).await
    }

    async fn delete(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        run_delete(self.pool()?, table, query).await
    }

    async fn upsert(&self, table: &str, row: Row, unique_key: &str) -> StoreResult<InsertOutcome> {
        run_upsert(self.pool()?, table, row, unique_key).await
    }

    async fn raw(&self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome> {
        run_raw(self.pool()?, query, params).await
    }

    async fn create_table(&self, table: &TableDef) -> StoreResult<()> {
        run_create_table(self.pool()?, table).await
    }

    async fn drop_table(&self, table: &str) -> StoreResult<()> {
        run_drop_table(self.pool()?, table).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn TxHandle>> {
        let tx = self
            .pool()?
            .begin()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "begin", e))?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

// ---------------------------------------------------------------------------
// Transaction handle
// ---------------------------------------------------------------------------

struct SqliteTx {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl TxHandle for SqliteTx {
    async fn select(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>> {
        run_select(&mut *self.tx, table, query).await
    }

    async fn count(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        run_count(&mut *self.tx, table, query).await
    }

    async fn insert(&mut self, table: &str, row: Row) -> StoreResult<InsertOutcome> {
        run_insert(&mut *self.tx, table, row).await
    }

    async fn update(
        &mut self,
        table: &str,
        changes: Row,
        query: &QueryDescriptor,
    ) -> StoreResult<u64> {
        run_update(&mut *self.tx, table, changes, query).await
    }

    async fn delete(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        run_delete(&mut *self.tx, table, query).await
    }

    async fn upsert(
        &mut self,
        table: &str,
        row: Row,
        unique_key: &str,
    ) -> StoreResult<InsertOutcome> {
        run_upsert(&mut *self.tx, table, row, unique_key).await
    }

    async fn raw(&mut self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome> {
        run_raw(&mut *self.tx, query, params).await
    }

    async fn create_table(&mut self, table: &TableDef) -> StoreResult<()> {
        for statement in sql::create_table(DIALECT, table) {
            sqlx::query(&statement)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| StoreError::backend(BACKEND, "create table", e))?;
        }
        Ok(())
    }

    async fn drop_table(&mut self, table: &str) -> StoreResult<()> {
        run_drop_table(&mut *self.tx, table).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "commit", e))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "rollback", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosstore_core::query::Predicate;
    use crosstore_core::row::row_from_value;
    use crosstore_core::ColumnDef;
    use serde_json::json;

    async fn memory_adapter() -> SqliteAdapter {
        let mut adapter = SqliteAdapter::new(StoreConfig::sqlite(":memory:"));
        adapter.connect().await.unwrap();
        adapter
            .create_table(&TableDef::new(
                "posts",
                vec![
                    ColumnDef::increments("id"),
                    ColumnDef::string("name"),
                    ColumnDef::boolean("active").default_value(json!(false)),
                    ColumnDef::integer("views").default_value(json!(0)),
                ],
            ))
            .await
            .unwrap();
        adapter
    }

    #[tokio::test]
    async fn operations_fail_before_connect() {
        let adapter = SqliteAdapter::new(StoreConfig::sqlite(":memory:"));
        let err = adapter
            .select("posts", &QueryDescriptor::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));
    }

    #[tokio::test]
    async fn insert_and_select_roundtrip() {
        let adapter = memory_adapter().await;
        let outcome = adapter
            .insert(
                "posts",
                row_from_value(json!({"name": "A", "active": true, "views": 150})),
            )
            .await
            .unwrap();
        assert_eq!(outcome.affected, 1);
        assert_eq!(outcome.id, json!(1));

        let mut q = QueryDescriptor::new();
        q.filter.push(("id".into(), Predicate::Eq(json!(1))));
        let rows = adapter.select("posts", &q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("A"));
        assert_eq!(rows[0]["active"], json!(true));
        assert_eq!(rows[0]["views"], json!(150));
    }

    #[tokio::test]
    async fn create_table_is_idempotent() {
        let adapter = memory_adapter().await;
        adapter
            .create_table(&TableDef::new(
                "posts",
                vec![ColumnDef::increments("id"), ColumnDef::string("name")],
            ))
            .await
            .unwrap();
        adapter.drop_table("posts").await.unwrap();
        // Dropping an absent table is also a no-op.
        adapter.drop_table("posts").await.unwrap();
    }

    #[tokio::test]
    async fn transaction_rolls_back() {
        let adapter = memory_adapter().await;
        adapter
            .insert("posts", row_from_value(json!({"name": "keep"})))
            .await
            .unwrap();

        let mut tx = adapter.begin().await.unwrap();
        tx.insert("posts", row_from_value(json!({"name": "discard"})))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let count = adapter.count("posts", &QueryDescriptor::new()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn upsert_is_a_single_conditional_write() {
        let adapter = memory_adapter().await;
        adapter
            .create_table(&TableDef::new(
                "users",
                vec![
                    ColumnDef::increments("id"),
                    ColumnDef::string("email").unique(),
                    ColumnDef::string("name"),
                ],
            ))
            .await
            .unwrap();

        let first = adapter
            .upsert(
                "users",
                row_from_value(json!({"email": "a@b.c", "name": "A"})),
                "email",
            )
            .await
            .unwrap();
        assert_eq!(first.affected, 1);

        let second = adapter
            .upsert(
                "users",
                row_from_value(json!({"email": "a@b.c", "name": "B"})),
                "email",
            )
            .await
            .unwrap();
        assert_eq!(second.affected, 1);
        assert_eq!(first.id, second.id);

        let rows = adapter.select("users", &QueryDescriptor::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("B"));
    }

    #[tokio::test]
    async fn raw_distinguishes_reads_from_writes() {
        let adapter = memory_adapter().await;
        let written = adapter
            .raw(
                "INSERT INTO posts (name) VALUES (?)",
                vec![json!("raw-row")],
            )
            .await
            .unwrap();
        assert_eq!(written, RawOutcome::Affected(1));

        let read = adapter
            .raw("SELECT name FROM posts WHERE name = ?", vec![json!("raw-row")])
            .await
            .unwrap();
        assert_eq!(read.rows().len(), 1);
        assert_eq!(read.rows()[0]["name"], json!("raw-row"));
    }
}
