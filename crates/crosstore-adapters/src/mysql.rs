//! MySQL adapter: pooled SQL backend over sqlx.
//!
//! MySQL cannot express `CREATE INDEX IF NOT EXISTS`, so `create_table`
//! tolerates the duplicate-index error to stay idempotent. `TINYINT(1)`
//! columns are reported as `BOOLEAN` by the driver and decode as real
//! booleans.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{
    MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::{Column, MySql, MySqlPool, Row as _, TypeInfo, ValueRef};
use tracing::debug;

use crosstore_core::{
    InsertOutcome, QueryDescriptor, RawOutcome, Row, StoreConfig, StoreError, StoreResult,
    TableDef,
};

use crate::sql::{self, Dialect};
use crate::traits::{Adapter, TxHandle};

const BACKEND: &str = "mysql";
const DIALECT: Dialect = Dialect::Mysql;

/// MySQL adapter over an sqlx connection pool.
pub struct MysqlAdapter {
    config: StoreConfig,
    pool: Option<MySqlPool>,
}

impl MysqlAdapter {
    pub fn new(config: StoreConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> StoreResult<&MySqlPool> {
        self.pool.as_ref().ok_or(StoreError::NotConnected)
    }
}

// ---------------------------------------------------------------------------
// Value binding and row decoding
// ---------------------------------------------------------------------------

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

fn bind_value<'q>(query: MySqlQuery<'q>, value: &Value) -> MySqlQuery<'q> {
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
        other => query.bind(other.to_string()),
    }
}

fn bind_all<'q>(mut query: MySqlQuery<'q>, params: &[Value]) -> MySqlQuery<'q> {
    for param in params {
        query = bind_value(query, param);
    }
    query
}

fn decode_row(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_column(row, index));
    }
    out
}

fn decode_column(row: &MySqlRow, index: usize) -> Value {
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
    if let Ok(v) = row.try_get::<u64, _>(index) {
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
    if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
        return Value::String(v.to_rfc3339());
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        return Value::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<Value, _>(index) {
        return v;
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
    E: sqlx::Executor<'a, Database = MySql>,
{
    let built = sql::select(DIALECT, table, query);
    debug!(table, sql = %built.sql, "mysql select");
    let rows = bind_all(sqlx::query(&built.sql), &built.params)
        .fetch_all(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "select", e))?;
    Ok(rows.iter().map(decode_row).collect())
}

async fn run_count<'a, E>(executor: E, table: &str, query: &QueryDescriptor) -> StoreResult<u64>
where
    E: sqlx::Executor<'a, Database = MySql>,
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
    E: sqlx::Executor<'a, Database = MySql>,
{
    let built = sql::insert(DIALECT, table, &row);
    debug!(table, sql = %built.sql, "mysql insert");
    let result = bind_all(sqlx::query(&built.sql), &built.params)
        .execute(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "insert", e))?;
    Ok(InsertOutcome {
        id: Value::from(result.last_insert_id()),
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
    E: sqlx::Executor<'a, Database = MySql>,
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
    E: sqlx::Executor<'a, Database = MySql>,
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
    E: sqlx::Executor<'a, Database = MySql>,
{
    let key_value = row.get(unique_key).cloned().unwrap_or(Value::Null);
    let built = sql::upsert(DIALECT, table, &row, unique_key);
    debug!(table, sql = %built.sql, "mysql upsert");
    let result = bind_all(sqlx::query(&built.sql), &built.params)
        .execute(executor)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "upsert", e))?;

    // MySQL reports 1 for an insert and 2 for a duplicate-key update;
    // either way exactly one logical row was written.
    let affected = result.rows_affected().min(1);
    let id = match result.last_insert_id() {
        0 => key_value,
        id => Value::from(id),
    };
    Ok(InsertOutcome { id, affected })
}

async fn run_raw<'a, E>(executor: E, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome>
where
    E: sqlx::Executor<'a, Database = MySql>,
{
    debug!(sql = %query, param_count = params.len(), "mysql raw");
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

/// `CREATE INDEX` has no `IF NOT EXISTS` on MySQL; a duplicate-index error
/// means the index is already there and idempotency is preserved.
fn is_duplicate_index_error(err: &sqlx::Error) -> bool {
    err.to_string().contains("Duplicate key name")
}

async fn run_drop_table<'a, E>(executor: E, table: &str) -> StoreResult<()>
where
    E: sqlx::Executor<'a, Database = MySql>,
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
impl Adapter for MysqlAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn connect(&mut self) -> StoreResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        let url = self.config.connection_url()?;
        let mut options = MySqlConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Config(format!("invalid mysql url: {e}")))?;
        if self.config.options.ssl.unwrap_or(false) {
            options = options.ssl_mode(MySqlSslMode::Required);
        }

        let opts = &self.config.options;
        let mut pool_options = MySqlPoolOptions::new()
            .max_connections(opts.max_connections.unwrap_or(10))
            .min_connections(opts.min_connections.unwrap_or(0));
        if let Some(ms) = opts.acquire_timeout_ms {
            pool_options = pool_options.acquire_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = opts.idle_timeout_ms {
            pool_options = pool_options.idle_timeout(Duration::from_millis(ms));
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "connect", e))?;

        debug!(max_connections = opts.max_connections.unwrap_or(10), "mysql connected");
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
        let pool = self.pool()?;
        for statement in sql::create_table(DIALECT, table) {
            if let Err(e) = sqlx::query(&statement).execute(pool).await {
                if statement.starts_with("CREATE INDEX") && is_duplicate_index_error(&e) {
                    continue;
                }
                return Err(StoreError::backend(BACKEND, "create table", e));
            }
        }
        Ok(())
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
        Ok(Box::new(MysqlTx { tx }))
    }
}

// ---------------------------------------------------------------------------
// Transaction handle
// ---------------------------------------------------------------------------

struct MysqlTx {
    tx: sqlx::Transaction<'static, MySql>,
}

#[async_trait]
impl TxHandle for MysqlTx {
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
            if let Err(e) = sqlx::query(&statement).execute(&mut *self.tx).await {
                if statement.starts_with("CREATE INDEX") && is_duplicate_index_error(&e) {
                    continue;
                }
                return Err(StoreError::backend(BACKEND, "create table", e));
            }
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
