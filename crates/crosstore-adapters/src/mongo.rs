//! MongoDB adapter: document backend over the official driver.
//!
//! The shared predicate algebra maps onto `{$gt, $gte, $lt, $lte, $ne, $in,
//! $regex}`. The `id` field maps to `_id` in both directions: a 24-character
//! hex string bound to `id` is promoted to a native `ObjectId`, and
//! documents come back with `_id` rendered as a hex string under `id`.
//!
//! Transactions are session-scoped and ACID within a replica set; a
//! standalone `mongod` rejects `startTransaction`.

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, ClientSession, Database, IndexModel};
use serde_json::Value;
use tracing::debug;

use crosstore_core::query::Predicate;
use crosstore_core::{
    CmpOp, Direction, InsertOutcome, QueryDescriptor, RawOutcome, Row, StoreConfig, StoreError,
    StoreResult, TableDef,
};

use crate::traits::{Adapter, TxHandle};

const BACKEND: &str = "mongodb";

/// MongoDB adapter over one process-wide client.
pub struct MongoAdapter {
    config: StoreConfig,
    client: Option<Client>,
}

impl MongoAdapter {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn client(&self) -> StoreResult<&Client> {
        self.client.as_ref().ok_or(StoreError::NotConnected)
    }

    fn database(&self) -> StoreResult<Database> {
        let name = self
            .config
            .database
            .as_deref()
            .ok_or_else(|| StoreError::Config("mongodb requires a database name".into()))?;
        Ok(self.client()?.database(name))
    }
}

// ---------------------------------------------------------------------------
// BSON conversions
// ---------------------------------------------------------------------------

fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                Bson::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            let mut document = Document::new();
            for (key, item) in map {
                document.insert(key.clone(), json_to_bson(item));
            }
            Bson::Document(document)
        }
    }
}

fn bson_to_json(bson: Bson) -> Value {
    match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i64::from(i)),
        Bson::Int64(i) => Value::from(i),
        Bson::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or(Value::Null),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(document) => {
            let mut map = Row::new();
            for (key, item) in document {
                map.insert(key, bson_to_json(item));
            }
            Value::Object(map)
        }
        other => Value::String(other.to_string()),
    }
}

/// Render a document as a row, mapping `_id` back to `id` as a hex string.
fn document_to_row(document: Document) -> Row {
    let mut row = Row::new();
    for (key, value) in document {
        let key = if key == "_id" { "id".to_string() } else { key };
        row.insert(key, bson_to_json(value));
    }
    row
}

/// Render a row as a document, mapping `id` to `_id` with ObjectId
/// promotion for 24-character hex strings.
fn row_to_document(row: &Row) -> Document {
    let mut document = Document::new();
    for (key, value) in row {
        if key == "id" {
            document.insert("_id", promote_id(value));
        } else {
            document.insert(key.clone(), json_to_bson(value));
        }
    }
    document
}

/// A 24-character hex string destined for `_id` becomes a native ObjectId;
/// anything else passes through unchanged.
fn promote_id(value: &Value) -> Bson {
    if let Some(s) = value.as_str() {
        if let Ok(oid) = ObjectId::parse_str(s) {
            return Bson::ObjectId(oid);
        }
    }
    json_to_bson(value)
}

/// Translate an SQL LIKE pattern to an anchored regular expression.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c if "\\.+*?()|[]{}^$".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

/// Translate the predicate algebra to a MongoDB filter document.
fn filter_document(query: &QueryDescriptor) -> Document {
    let mut filter = Document::new();
    for (field, predicate) in &query.filter {
        let is_id = field == "id";
        let name = if is_id { "_id" } else { field.as_str() };
        let convert = |v: &Value| -> Bson {
            if is_id {
                promote_id(v)
            } else {
                json_to_bson(v)
            }
        };

        let entry: Bson = match predicate {
            Predicate::Eq(value) => convert(value),
            Predicate::In(values) => {
                let members: Vec<Bson> = values.iter().map(|v| convert(v)).collect();
                Bson::Document(doc! { "$in": members })
            }
            Predicate::IsNull => Bson::Null,
            Predicate::Cmp { op, value } => {
                let operator = match op {
                    CmpOp::Gt => "$gt",
                    CmpOp::Gte => "$gte",
                    CmpOp::Lt => "$lt",
                    CmpOp::Lte => "$lte",
                    CmpOp::Ne => "$ne",
                    CmpOp::Like => "$regex",
                };
                let operand = if *op == CmpOp::Like {
                    Bson::String(like_to_regex(value.as_str().unwrap_or_default()))
                } else {
                    convert(value)
                };
                Bson::Document(doc! { operator: operand })
            }
        };
        filter.insert(name, entry);
    }
    filter
}

fn sort_document(query: &QueryDescriptor) -> Document {
    let mut sort = Document::new();
    for ordering in &query.order_by {
        let field = if ordering.field == "id" {
            "_id"
        } else {
            ordering.field.as_str()
        };
        let direction = match ordering.direction {
            Direction::Asc => 1,
            Direction::Desc => -1,
        };
        sort.insert(field, direction);
    }
    sort
}

fn projection_document(query: &QueryDescriptor) -> Option<Document> {
    if query.columns.is_empty() {
        return None;
    }
    let mut projection = Document::new();
    for column in &query.columns {
        let field = if column == "id" { "_id" } else { column.as_str() };
        projection.insert(field, 1);
    }
    Some(projection)
}

fn set_document(changes: &Row) -> Document {
    doc! { "$set": row_to_document(changes) }
}

/// Parse a raw query string as a `runCommand` JSON document.
fn command_document(query: &str) -> StoreResult<Document> {
    let value: Value = serde_json::from_str(query).map_err(|e| {
        StoreError::backend(BACKEND, "raw query", format!("expected JSON command: {e}"))
    })?;
    match json_to_bson(&value) {
        Bson::Document(document) => Ok(document),
        _ => Err(StoreError::backend(
            BACKEND,
            "raw query",
            "command must be a JSON object",
        )),
    }
}

fn index_models(table: &TableDef) -> Vec<IndexModel> {
    table
        .columns
        .iter()
        .filter(|c| c.unique || c.index)
        .map(|c| {
            let options = IndexOptions::builder().unique(c.unique).build();
            IndexModel::builder()
                .keys(doc! { c.name.clone(): 1 })
                .options(options)
                .build()
        })
        .collect()
}

fn already_exists(err: &mongodb::error::Error) -> bool {
    let message = err.to_string();
    message.contains("NamespaceExists") || message.contains("already exists")
}

// ---------------------------------------------------------------------------
// Adapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Adapter for MongoAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn connect(&mut self) -> StoreResult<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let url = self.config.connection_url()?;
        let mut options = ClientOptions::parse(&url)
            .await
            .map_err(|e| StoreError::Config(format!("invalid mongodb url: {e}")))?;
        if let Some(ms) = self.config.options.server_selection_timeout_ms {
            options.server_selection_timeout = Some(std::time::Duration::from_millis(ms));
        }
        if let Some(size) = self.config.options.max_connections {
            options.max_pool_size = Some(size);
        }

        let client = Client::with_options(options)
            .map_err(|e| StoreError::backend(BACKEND, "connect", e))?;
        debug!("mongodb client created");
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        // Dropping the client shuts its connection pool down.
        self.client = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn select(&self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>> {
        let collection = self.database()?.collection::<Document>(table);
        let filter = filter_document(query);
        debug!(table, filter = %filter, "mongodb select");

        let mut find = collection.find(filter);
        let sort = sort_document(query);
        if !sort.is_empty() {
            find = find.sort(sort);
        }
        if let Some(projection) = projection_document(query) {
            find = find.projection(projection);
        }
        if let Some(offset) = query.offset {
            find = find.skip(offset);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit as i64);
        }

        let cursor = find
            .await
            .map_err(|e| StoreError::backend(BACKEND, "select", e))?;
        let documents: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "select", e))?;
        Ok(documents.into_iter().map(document_to_row).collect())
    }

    async fn count(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        let collection = self.database()?.collection::<Document>(table);
        collection
            .count_documents(filter_document(query))
            .await
            .map_err(|e| StoreError::backend(BACKEND, "count", e))
    }

    async fn insert(&self, table: &str, row: Row) -> StoreResult<InsertOutcome> {
        let collection = self.database()?.collection::<Document>(table);
        let result = collection
            .insert_one(row_to_document(&row))
            .await
            .map_err(|e| StoreError::backend(BACKEND, "insert", e))?;
        Ok(InsertOutcome {
            id: bson_to_json(result.inserted_id),
            affected: 1,
        })
    }

    async fn update(
        &self,
        table: &str,
        changes: Row,
        query: &QueryDescriptor,
    ) -> StoreResult<u64> {
        let collection = self.database()?.collection::<Document>(table);
        let result = collection
            .update_many(filter_document(query), set_document(&changes))
            .await
            .map_err(|e| StoreError::backend(BACKEND, "update", e))?;
        Ok(result.modified_count)
    }

    async fn delete(&self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        let collection = self.database()?.collection::<Document>(table);
        let result = collection
            .delete_many(filter_document(query))
            .await
            .map_err(|e| StoreError::backend(BACKEND, "delete", e))?;
        Ok(result.deleted_count)
    }

    async fn upsert(&self, table: &str, row: Row, unique_key: &str) -> StoreResult<InsertOutcome> {
        let collection = self.database()?.collection::<Document>(table);
        let key_value = row.get(unique_key).cloned().unwrap_or(Value::Null);
        let filter = doc! { unique_key: json_to_bson(&key_value) };

        let result = collection
            .update_one(filter, set_document(&row))
            .upsert(true)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "upsert", e))?;

        let id = match result.upserted_id {
            Some(id) => bson_to_json(id),
            None => key_value,
        };
        Ok(InsertOutcome { id, affected: 1 })
    }

    async fn raw(&self, query: &str, _params: Vec<Value>) -> StoreResult<RawOutcome> {
        let command = command_document(query)?;
        debug!(command = %command, "mongodb raw command");
        let reply = self
            .database()?
            .run_command(command)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "raw query", e))?;
        Ok(RawOutcome::Rows(vec![document_to_row(reply)]))
    }

    async fn create_table(&self, table: &TableDef) -> StoreResult<()> {
        let db = self.database()?;
        if let Err(e) = db.create_collection(&table.name).await {
            if !already_exists(&e) {
                return Err(StoreError::backend(BACKEND, "create table", e));
            }
        }
        let collection = db.collection::<Document>(&table.name);
        for model in index_models(table) {
            collection
                .create_index(model)
                .await
                .map_err(|e| StoreError::backend(BACKEND, "create table", e))?;
        }
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> StoreResult<()> {
        self.database()?
            .collection::<Document>(table)
            .drop()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "drop table", e))
    }

    async fn begin(&self) -> StoreResult<Box<dyn TxHandle>> {
        let mut session = self
            .client()?
            .start_session()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "begin", e))?;
        session
            .start_transaction()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "begin", e))?;
        Ok(Box::new(MongoTx {
            database: self.database()?,
            session,
        }))
    }
}

// ---------------------------------------------------------------------------
// Transaction handle
// ---------------------------------------------------------------------------

struct MongoTx {
    database: Database,
    session: ClientSession,
}

#[async_trait]
impl TxHandle for MongoTx {
    async fn select(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<Vec<Row>> {
        let collection = self.database.collection::<Document>(table);
        let mut find = collection.find(filter_document(query));
        let sort = sort_document(query);
        if !sort.is_empty() {
            find = find.sort(sort);
        }
        if let Some(projection) = projection_document(query) {
            find = find.projection(projection);
        }
        if let Some(offset) = query.offset {
            find = find.skip(offset);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit as i64);
        }

        let mut cursor = find
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "select", e))?;
        let mut rows = Vec::new();
        while let Some(document) = cursor.next(&mut self.session).await {
            let document = document.map_err(|e| StoreError::backend(BACKEND, "select", e))?;
            rows.push(document_to_row(document));
        }
        Ok(rows)
    }

    async fn count(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        self.database
            .collection::<Document>(table)
            .count_documents(filter_document(query))
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "count", e))
    }

    async fn insert(&mut self, table: &str, row: Row) -> StoreResult<InsertOutcome> {
        let result = self
            .database
            .collection::<Document>(table)
            .insert_one(row_to_document(&row))
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "insert", e))?;
        Ok(InsertOutcome {
            id: bson_to_json(result.inserted_id),
            affected: 1,
        })
    }

    async fn update(
        &mut self,
        table: &str,
        changes: Row,
        query: &QueryDescriptor,
    ) -> StoreResult<u64> {
        let result = self
            .database
            .collection::<Document>(table)
            .update_many(filter_document(query), set_document(&changes))
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "update", e))?;
        Ok(result.modified_count)
    }

    async fn delete(&mut self, table: &str, query: &QueryDescriptor) -> StoreResult<u64> {
        let result = self
            .database
            .collection::<Document>(table)
            .delete_many(filter_document(query))
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "delete", e))?;
        Ok(result.deleted_count)
    }

    async fn upsert(
        &mut self,
        table: &str,
        row: Row,
        unique_key: &str,
    ) -> StoreResult<InsertOutcome> {
        let key_value = row.get(unique_key).cloned().unwrap_or(Value::Null);
        let filter = doc! { unique_key: json_to_bson(&key_value) };
        let result = self
            .database
            .collection::<Document>(table)
            .update_one(filter, set_document(&row))
            .upsert(true)
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "upsert", e))?;
        let id = match result.upserted_id {
            Some(id) => bson_to_json(id),
            None => key_value,
        };
        Ok(InsertOutcome { id, affected: 1 })
    }

    async fn raw(&mut self, query: &str, _params: Vec<Value>) -> StoreResult<RawOutcome> {
        let command = command_document(query)?;
        let reply = self
            .database
            .run_command(command)
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "raw query", e))?;
        Ok(RawOutcome::Rows(vec![document_to_row(reply)]))
    }

    async fn create_table(&mut self, table: &TableDef) -> StoreResult<()> {
        let collection = self.database.collection::<Document>(&table.name);
        for model in index_models(table) {
            collection
                .create_index(model)
                .session(&mut self.session)
                .await
                .map_err(|e| StoreError::backend(BACKEND, "create table", e))?;
        }
        Ok(())
    }

    async fn drop_table(&mut self, table: &str) -> StoreResult<()> {
        self.database
            .collection::<Document>(table)
            .drop()
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::backend(BACKEND, "drop table", e))
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.session
            .commit_transaction()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "commit", e))
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.session
            .abort_transaction()
            .await
            .map_err(|e| StoreError::backend(BACKEND, "rollback", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosstore_core::row::row_from_value;
    use serde_json::json;

    #[test]
    fn filter_maps_the_fixed_operator_table() {
        let mut q = QueryDescriptor::new();
        q.filter.push(("active".into(), Predicate::Eq(json!(true))));
        q.filter.push((
            "views".into(),
            Predicate::Cmp {
                op: CmpOp::Gt,
                value: json!(100),
            },
        ));
        q.filter.push((
            "status".into(),
            Predicate::In(vec![json!("a"), json!("b")]),
        ));
        q.filter.push(("deleted_at".into(), Predicate::IsNull));

        let filter = filter_document(&q);
        assert_eq!(filter.get_bool("active").unwrap(), true);
        assert_eq!(
            filter.get_document("views").unwrap().get_i64("$gt").unwrap(),
            100
        );
        assert_eq!(
            filter
                .get_document("status")
                .unwrap()
                .get_array("$in")
                .unwrap()
                .len(),
            2
        );
        assert_eq!(filter.get("deleted_at"), Some(&Bson::Null));
    }

    #[test]
    fn id_field_promotes_24_hex_to_object_id() {
        let hex = "507f1f77bcf86cd799439011";
        let mut q = QueryDescriptor::new();
        q.filter.push(("id".into(), Predicate::Eq(json!(hex))));
        let filter = filter_document(&q);
        assert_eq!(
            filter.get("_id"),
            Some(&Bson::ObjectId(ObjectId::parse_str(hex).unwrap()))
        );

        // Shorter strings stay plain strings under _id.
        let mut q = QueryDescriptor::new();
        q.filter.push(("id".into(), Predicate::Eq(json!("short"))));
        let filter = filter_document(&q);
        assert_eq!(filter.get("_id"), Some(&Bson::String("short".into())));
    }

    #[test]
    fn like_becomes_anchored_regex() {
        let mut q = QueryDescriptor::new();
        q.filter.push((
            "name".into(),
            Predicate::Cmp {
                op: CmpOp::Like,
                value: json!("ali%"),
            },
        ));
        let filter = filter_document(&q);
        assert_eq!(
            filter
                .get_document("name")
                .unwrap()
                .get_str("$regex")
                .unwrap(),
            "^ali.*$"
        );
        assert_eq!(like_to_regex("a_c.d"), "^a.c\\.d$");
    }

    #[test]
    fn documents_round_trip_through_id_mapping() {
        let hex = "507f1f77bcf86cd799439011";
        let row = row_from_value(json!({"id": hex, "name": "A"}));
        let document = row_to_document(&row);
        assert_eq!(
            document.get("_id"),
            Some(&Bson::ObjectId(ObjectId::parse_str(hex).unwrap()))
        );

        let back = document_to_row(document);
        assert_eq!(back.get("id"), Some(&json!(hex)));
        assert_eq!(back.get("name"), Some(&json!("A")));
    }

    #[test]
    fn sort_maps_id_and_direction() {
        let mut q = QueryDescriptor::new();
        q.order_by.push(crosstore_core::Ordering {
            field: "id".into(),
            direction: Direction::Desc,
        });
        let sort = sort_document(&q);
        assert_eq!(sort.get_i32("_id").unwrap(), -1);
    }

    #[test]
    fn raw_query_must_be_a_json_object() {
        assert!(command_document("{\"ping\": 1}").is_ok());
        assert!(command_document("SELECT 1").is_err());
        assert!(command_document("[1, 2]").is_err());
    }
}
