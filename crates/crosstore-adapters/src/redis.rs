//! Redis adapter: key-value backend, a lossy approximation of the
//! relational surface.
//!
//! Rows are JSON strings stored under `table:id`. An `id` equality predicate
//! becomes a point lookup; every other read falls back to a `SCAN table:*`
//! key walk plus in-memory evaluation of the predicate algebra. That scan is
//! **not scalable** and is logged as a warning: restrict this variant to
//! cache/session-style workloads rather than treating it as a peer of the
//! SQL backends.
//!
//! There is no application-level rollback: commands issued through the
//! transaction handle take effect immediately, `commit` is a no-op, and
//! `rollback` only logs the gap. Writes that happened before an abort
//! persist.

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, warn};

use crosstore_core::query::compare;
use crosstore_core::{
    Direction, InsertOutcome, QueryDescriptor, RawOutcome, Row, StoreConfig, StoreError,
    StoreResult, TableDef,
};

use crate::traits::{Adapter, TxHandle};

const BACKEND: &str = "redis";

/// Redis adapter over one multiplexed connection for the process lifetime.
pub struct RedisAdapter {
    config: StoreConfig,
    conn: Option<ConnectionManager>,
}

impl RedisAdapter {
    pub fn new(config: StoreConfig) -> Self {
        Self { config, conn: None }
    }

    fn conn(&self) -> StoreResult<ConnectionManager> {
        self.conn.clone().ok_or(StoreError::NotConnected)
    }
}

// ---------------------------------------------------------------------------
// Keys and row codecs
// ---------------------------------------------------------------------------

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn record_key(table: &str, id: &Value) -> String {
    format!("{table}:{}", id_string(id))
}

fn schema_key(table: &str) -> String {
    format!("_schema:{table}")
}

fn scan_pattern(table: &str) -> String {
    format!("{table}:*")
}

fn encode_row(row: &Row) -> StoreResult<String> {
    serde_json::to_string(&Value::Object(row.clone())).map_err(StoreError::from)
}

fn decode_row(raw: &str) -> StoreResult<Row> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::backend(
            BACKEND,
            "select",
            "stored value is not a JSON object",
        )),
    }
}

fn project(row: Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row;
    }
    let mut out = Row::new();
    for column in columns {
        if let Some(value) = row.get(column) {
            out.insert(column.clone(), value.clone());
        }
    }
    out
}

fn sort_rows(rows: &mut [Row], query: &QueryDescriptor) {
    if query.order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for ordering in &query.order_by {
            let left = a.get(&ordering.field).unwrap_or(&Value::Null);
            let right = b.get(&ordering.field).unwrap_or(&Value::Null);
            let mut ord = compare(left, right).unwrap_or(std::cmp::Ordering::Equal);
            if ordering.direction == Direction::Desc {
                ord = ord.reverse();
            }
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn paginate(rows: Vec<Row>, query: &QueryDescriptor) -> Vec<Row> {
    let offset = query.offset.unwrap_or(0) as usize;
    let mut rows: Vec<Row> = rows.into_iter().skip(offset).collect();
    if let Some(limit) = query.limit {
        rows.truncate(limit as usize);
    }
    rows
}

// ---------------------------------------------------------------------------
// Operations shared by the adapter and its transaction handle
// ---------------------------------------------------------------------------

/// Collect every key under `table:*` via SCAN.
async fn scan_keys(
    conn: &ConnectionManager,
    table: &str,
    operation: &'static str,
) -> StoreResult<Vec<String>> {
    let mut scan_conn = conn.clone();
    let mut keys: Vec<String> = Vec::new();
    let mut iter = scan_conn
        .scan_match::<String, String>(scan_pattern(table))
        .await
        .map_err(|e| StoreError::backend(BACKEND, operation, e))?;
    while let Some(key) = iter.next_item().await {
        keys.push(key);
    }
    Ok(keys)
}

/// Fetch every row of a table via SCAN + MGET. The lossy full-scan path.
async fn load_all(conn: &mut ConnectionManager, table: &str) -> StoreResult<Vec<Row>> {
    let keys = scan_keys(conn, table, "select").await?;
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<Option<String>> = conn
        .mget(&keys)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "select", e))?;

    let mut rows = Vec::with_capacity(values.len());
    for raw in values.into_iter().flatten() {
        rows.push(decode_row(&raw)?);
    }
    Ok(rows)
}

/// Rows matching the descriptor's predicates: a point lookup when an `id`
/// equality is present, otherwise scan-and-filter in memory.
async fn matching_rows(
    conn: &mut ConnectionManager,
    table: &str,
    query: &QueryDescriptor,
) -> StoreResult<Vec<Row>> {
    let mut rows = if let Some(id) = query.eq_value("id") {
        let key = record_key(table, id);
        debug!(table, key = %key, "redis point lookup");
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "select", e))?;
        match raw {
            Some(raw) => vec![decode_row(&raw)?],
            None => Vec::new(),
        }
    } else {
        if !query.is_unfiltered() {
            warn!(
                table,
                "redis has no secondary indexes; filtering a full key scan in memory"
            );
        }
        load_all(conn, table).await?
    };

    rows.retain(|row| query.matches_row(row));
    Ok(rows)
}

async fn op_select(
    conn: &mut ConnectionManager,
    table: &str,
    query: &QueryDescriptor,
) -> StoreResult<Vec<Row>> {
    let mut rows = matching_rows(conn, table, query).await?;
    sort_rows(&mut rows, query);
    let rows = paginate(rows, query);
    Ok(rows
        .into_iter()
        .map(|row| project(row, &query.columns))
        .collect())
}

async fn op_count(
    conn: &mut ConnectionManager,
    table: &str,
    query: &QueryDescriptor,
) -> StoreResult<u64> {
    Ok(matching_rows(conn, table, query).await?.len() as u64)
}

async fn op_insert(
    conn: &mut ConnectionManager,
    table: &str,
    mut row: Row,
) -> StoreResult<InsertOutcome> {
    let id = row
        .get("id")
        .cloned()
        .unwrap_or_else(|| Value::String(uuid::Uuid::new_v4().to_string()));
    row.insert("id".to_string(), id.clone());

    let key = record_key(table, &id);
    let payload = encode_row(&row)?;
    debug!(table, key = %key, "redis insert");
    let _: () = conn
        .set(&key, payload)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "insert", e))?;
    Ok(InsertOutcome { id, affected: 1 })
}

async fn op_update(
    conn: &mut ConnectionManager,
    table: &str,
    changes: Row,
    query: &QueryDescriptor,
) -> StoreResult<u64> {
    let rows = matching_rows(conn, table, query).await?;
    let mut affected = 0u64;
    for mut row in rows {
        for (key, value) in &changes {
            row.insert(key.clone(), value.clone());
        }
        let id = row.get("id").cloned().unwrap_or(Value::Null);
        let key = record_key(table, &id);
        let payload = encode_row(&row)?;
        let _: () = conn
            .set(&key, payload)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "update", e))?;
        affected += 1;
    }
    Ok(affected)
}

async fn op_delete(
    conn: &mut ConnectionManager,
    table: &str,
    query: &QueryDescriptor,
) -> StoreResult<u64> {
    let rows = matching_rows(conn, table, query).await?;
    if rows.is_empty() {
        return Ok(0);
    }
    let keys: Vec<String> = rows
        .iter()
        .map(|row| record_key(table, row.get("id").unwrap_or(&Value::Null)))
        .collect();
    let deleted: u64 = conn
        .del(&keys)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "delete", e))?;
    Ok(deleted)
}

/// Keyed by `id`, an upsert is a plain SET (the native conditional write).
/// Any other unique key requires a scan to find the existing row first and
/// is therefore not atomic under concurrent writers.
async fn op_upsert(
    conn: &mut ConnectionManager,
    table: &str,
    mut row: Row,
    unique_key: &str,
) -> StoreResult<InsertOutcome> {
    if unique_key == "id" {
        return op_insert(conn, table, row).await;
    }

    let key_value = row.get(unique_key).cloned().unwrap_or(Value::Null);
    let mut query = QueryDescriptor::new();
    query.filter.push((
        unique_key.to_string(),
        crosstore_core::Predicate::Eq(key_value.clone()),
    ));

    let existing = matching_rows(conn, table, &query).await?;
    if let Some(current) = existing.into_iter().next() {
        if let Some(id) = current.get("id") {
            row.insert("id".to_string(), id.clone());
        }
    }
    op_insert(conn, table, row).await
}

async fn op_raw(
    conn: &mut ConnectionManager,
    command: &str,
    params: Vec<Value>,
) -> StoreResult<RawOutcome> {
    let mut cmd = redis::cmd(command);
    for param in &params {
        match param {
            Value::String(s) => {
                cmd.arg(s);
            }
            other => {
                cmd.arg(other.to_string());
            }
        }
    }

    debug!(command, param_count = params.len(), "redis raw command");
    let reply: redis::Value = cmd
        .query_async(conn)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "raw query", e))?;

    match reply {
        redis::Value::Int(n) => Ok(RawOutcome::Affected(n.max(0) as u64)),
        other => {
            let mut row = Row::new();
            row.insert("result".to_string(), reply_to_json(other));
            Ok(RawOutcome::Rows(vec![row]))
        }
    }
}

fn reply_to_json(value: redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(n) => Value::from(n),
        redis::Value::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        redis::Value::Boolean(b) => Value::Bool(b),
        redis::Value::SimpleString(s) => Value::String(s),
        redis::Value::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Value::String(s),
            Err(e) => Value::String(format!("{:?}", e.into_bytes())),
        },
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::Array(items) => {
            Value::Array(items.into_iter().map(reply_to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

async fn op_create_table(conn: &mut ConnectionManager, table: &TableDef) -> StoreResult<()> {
    // Namespace registration only: persist the definition as metadata and
    // enforce nothing.
    let payload = serde_json::to_string(table)?;
    let _: () = conn
        .set(schema_key(&table.name), payload)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "create table", e))?;
    Ok(())
}

async fn op_drop_table(conn: &mut ConnectionManager, table: &str) -> StoreResult<()> {
    let _: () = conn
        .del(schema_key(table))
        .await
        .map_err(|e| StoreError::backend(BACKEND, "drop table", e))?;

    let keys = scan_keys(conn, table, "drop table").await?;
    if keys.is_empty() {
        return Ok(());
    }
    let _: () = conn
        .del(&keys)
        .await
        .map_err(|e| StoreError::backend(BACKEND, "drop table", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Adapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Adapter for RedisAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn connect(&mut self) -> StoreResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let url = self.config.connection_url()?;
        let client = redis::Client::open(url.as_str())
            .map_err(|e| StoreError::Config(format!("invalid redis url: {e}")))?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "connect", e))?;

        if !self.config.options.lazy_connect.unwrap_or(false) {
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::backend(BACKEND, "connect", e))?;
        }

        debug!("redis connected");
        self.conn = Some(conn);
        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.conn = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn select(&self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>> {
        op_select(&mut self.conn()?, table, query).await
    }

    async fn count(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        op_count(&mut self.conn()?, table, query).await
    }

    async fn insert(&self, table: &str, row: Row) -> StoreResult<InsertOutcome> {
        op_insert(&mut self.conn()?, table, row).await
    }

    async fn update(
        &self,
        table: &str,
        changes: Row,
        query: &QueryDescriptor,
    ) -> StoreResult<u64> {
        op_update(&mut self.conn()?, table, changes, query).await
    }

    async fn delete(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        op_delete(&mut self.conn()?, table, query).await
    }

    async fn upsert(&self, table: &str, row: Row, unique_key: &str) -> StoreResult<InsertOutcome> {
        op_upsert(&mut self.conn()?, table, row, unique_key).await
    }

    async fn raw(&self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome> {
        op_raw(&mut self.conn()?, query, params).await
    }

    async fn create_table(&self, table: &TableDef) -> StoreResult<()> {
        op_create_table(&mut self.conn()?, table).await
    }

    async fn drop_table(&self, table: &str) -> StoreResult<()> {
        op_drop_table(&mut self.conn()?, table).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn TxHandle>> {
        Ok(Box::new(RedisTx { conn: self.conn()? }))
    }
}

// ---------------------------------------------------------------------------
// Transaction handle: the documented no-rollback gap
// ---------------------------------------------------------------------------

/// Redis "transaction" scope. Commands execute as they are issued; there is
/// nothing to undo on rollback. Callers that need atomicity must not select
/// Redis as their primary store.
struct RedisTx {
    conn: ConnectionManager,
}

#[async_trait]
impl TxHandle for RedisTx {
    async fn select(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>> {
        op_select(&mut self.conn, table, query).await
    }

    async fn count(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        op_count(&mut self.conn, table, query).await
    }

    async fn insert(&mut self, table: &str, row: Row) -> StoreResult<InsertOutcome> {
        op_insert(&mut self.conn, table, row).await
    }

    async fn update(
        &mut self,
        table: &str,
        changes: Row,
        query: &QueryDescriptor,
    ) -> StoreResult<u64> {
        op_update(&mut self.conn, table, changes, query).await
    }

    async fn delete(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        op_delete(&mut self.conn, table, query).await
    }

    async fn upsert(
        &mut self,
        table: &str,
        row: Row,
        unique_key: &str,
    ) -> StoreResult<InsertOutcome> {
        op_upsert(&mut self.conn, table, row, unique_key).await
    }

    async fn raw(&mut self, query: &str, params: Vec<Value>) -> StoreResult<RawOutcome> {
        op_raw(&mut self.conn, query, params).await
    }

    async fn create_table(&mut self, table: &TableDef) -> StoreResult<()> {
        op_create_table(&mut self.conn, table).await
    }

    async fn drop_table(&mut self, table: &str) -> StoreResult<()> {
        op_drop_table(&mut self.conn, table).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        warn!("redis cannot roll back: commands already executed will persist");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosstore_core::row::row_from_value;
    use crosstore_core::{Ordering, Predicate};
    use serde_json::json;

    #[test]
    fn key_construction() {
        assert_eq!(record_key("users", &json!("abc")), "users:abc");
        assert_eq!(record_key("users", &json!(42)), "users:42");
        assert_eq!(schema_key("users"), "_schema:users");
        assert_eq!(scan_pattern("users"), "users:*");
    }

    #[test]
    fn row_codec_roundtrip() {
        let row = row_from_value(json!({"id": "a", "views": 5}));
        let encoded = encode_row(&row).unwrap();
        assert_eq!(decode_row(&encoded).unwrap(), row);
        assert!(decode_row("[1,2]").is_err());
    }

    #[test]
    fn in_memory_sort_and_paging() {
        let mut rows: Vec<Row> = [3, 1, 2]
            .iter()
            .map(|n| row_from_value(json!({"views": n})))
            .collect();

        let mut q = QueryDescriptor::new();
        q.order_by.push(Ordering {
            field: "views".into(),
            direction: Direction::Desc,
        });
        sort_rows(&mut rows, &q);
        let views: Vec<&Value> = rows.iter().map(|r| &r["views"]).collect();
        assert_eq!(views, vec![&json!(3), &json!(2), &json!(1)]);

        q.offset = Some(1);
        q.limit = Some(1);
        let page = paginate(rows, &q);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["views"], json!(2));
    }

    #[test]
    fn projection_keeps_only_requested_columns() {
        let row = row_from_value(json!({"id": "a", "name": "A", "views": 5}));
        let projected = project(row, &["name".to_string()]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected["name"], json!("A"));
    }

    #[test]
    fn descriptor_filtering_matches_reference_semantics() {
        let rows: Vec<Row> = vec![
            row_from_value(json!({"active": true, "views": 150})),
            row_from_value(json!({"active": false, "views": 50})),
            row_from_value(json!({"active": true, "views": 90})),
        ];

        let mut q = QueryDescriptor::new();
        q.filter.push(("active".into(), Predicate::Eq(json!(true))));
        q.filter.push((
            "views".into(),
            Predicate::Cmp {
                op: crosstore_core::CmpOp::Gt,
                value: json!(100),
            },
        ));

        let matched: Vec<&Row> = rows.iter().filter(|r| q.matches_row(r)).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0]["views"], json!(150));
    }
}
