//! Fluent query builder.
//!
//! Each builder owns exactly one query descriptor; fluent methods consume
//! and return the builder so chains read naturally. Terminal operations
//! hand the finished descriptor to whichever adapter is currently active;
//! the builder itself never touches the network.

use futures::future::BoxFuture;
use serde_json::Value;

use crosstore_adapters::TxHandle;
use crosstore_core::{
    CmpOp, Direction, InsertOutcome, Ordering, Predicate, QueryDescriptor, Row, StoreResult,
};

use crate::manager::ConnectionManager;

/// Where a terminal operation executes: the shared connection manager, or a
/// live transaction scope.
enum Target<'a> {
    Manager(&'a ConnectionManager),
    Tx(&'a mut dyn TxHandle),
}

/// A fluent query over one table, bound to a connection or transaction.
pub struct QueryBuilder<'a> {
    target: Target<'a>,
    table: String,
    descriptor: QueryDescriptor,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(manager: &'a ConnectionManager, table: impl Into<String>) -> Self {
        Self {
            target: Target::Manager(manager),
            table: table.into(),
            descriptor: QueryDescriptor::new(),
        }
    }

    pub(crate) fn for_tx(tx: &'a mut dyn TxHandle, table: impl Into<String>) -> Self {
        Self {
            target: Target::Tx(tx),
            table: table.into(),
            descriptor: QueryDescriptor::new(),
        }
    }

    // ── fluent construction ──────────────────────────────────────────

    /// Restrict the selected columns (default is `*`).
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Scalar equality predicate. A `null` value means `IS NULL`.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let predicate = if value.is_null() {
            Predicate::IsNull
        } else {
            Predicate::Eq(value)
        };
        self.descriptor.filter.push((field.into(), predicate));
        self
    }

    /// Comparison predicate (`>`, `>=`, `<`, `<=`, `!=`, `LIKE`).
    pub fn filter_op(
        mut self,
        field: impl Into<String>,
        op: CmpOp,
        value: impl Into<Value>,
    ) -> Self {
        self.descriptor.filter.push((
            field.into(),
            Predicate::Cmp {
                op,
                value: value.into(),
            },
        ));
        self
    }

    /// Membership predicate (`IN`).
    pub fn filter_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.descriptor
            .filter
            .push((field.into(), Predicate::In(values)));
        self
    }

    /// `IS NULL` predicate.
    pub fn filter_null(mut self, field: impl Into<String>) -> Self {
        self.descriptor
            .filter
            .push((field.into(), Predicate::IsNull));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.descriptor.order_by.push(Ordering {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.descriptor.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.descriptor.offset = Some(offset);
        self
    }

    /// 1-indexed pagination: `offset = (page - 1) * per_page`,
    /// `limit = per_page`.
    pub fn paginate(mut self, page: u64, per_page: u64) -> Self {
        self.descriptor.offset = Some(page.max(1).saturating_sub(1) * per_page);
        self.descriptor.limit = Some(per_page);
        self
    }

    // ── execution plumbing ───────────────────────────────────────────

    async fn run_select(target: &mut Target<'a>, table: &str, q: &QueryDescriptor) -> StoreResult<Vec<Row>> {
        match target {
            Target::Manager(manager) => manager.select(table, q).await,
            Target::Tx(tx) => tx.select(table, q).await,
        }
    }

    // ── terminal operations ──────────────────────────────────────────

    /// Execute the query and return all matching rows.
    pub async fn get(mut self) -> StoreResult<Vec<Row>> {
        Self::run_select(&mut self.target, &self.table, &self.descriptor).await
    }

    /// The first matching row, if any.
    pub async fn first(mut self) -> StoreResult<Option<Row>> {
        self.descriptor.limit = Some(1);
        let rows = Self::run_select(&mut self.target, &self.table, &self.descriptor).await?;
        Ok(rows.into_iter().next())
    }

    /// Point lookup by identifier: equivalent to `filter("id", id).first()`.
    pub async fn find(self, id: impl Into<Value>) -> StoreResult<Option<Row>> {
        self.filter("id", id).first().await
    }

    /// Count the rows matching the predicates (ordering and paging are
    /// ignored).
    pub async fn count(mut self) -> StoreResult<u64> {
        match &mut self.target {
            Target::Manager(manager) => manager.count(&self.table, &self.descriptor).await,
            Target::Tx(tx) => tx.count(&self.table, &self.descriptor).await,
        }
    }

    /// Whether any row matches the predicates.
    pub async fn exists(self) -> StoreResult<bool> {
        Ok(self.count().await? > 0)
    }

    /// Insert one row.
    pub async fn insert(mut self, row: Row) -> StoreResult<InsertOutcome> {
        match &mut self.target {
            Target::Manager(manager) => manager.insert(&self.table, row).await,
            Target::Tx(tx) => tx.insert(&self.table, row).await,
        }
    }

    /// Insert a batch of rows, one insert per row. Not atomic across rows;
    /// wrap in a transaction when all-or-nothing matters.
    pub async fn insert_many(mut self, rows: Vec<Row>) -> StoreResult<u64> {
        let mut affected = 0u64;
        for row in rows {
            let outcome = match &mut self.target {
                Target::Manager(manager) => manager.insert(&self.table, row).await?,
                Target::Tx(tx) => tx.insert(&self.table, row).await?,
            };
            affected += outcome.affected;
        }
        Ok(affected)
    }

    /// Apply `changes` to every matching row.
    pub async fn update(mut self, changes: Row) -> StoreResult<u64> {
        match &mut self.target {
            Target::Manager(manager) => {
                manager.update(&self.table, changes, &self.descriptor).await
            }
            Target::Tx(tx) => tx.update(&self.table, changes, &self.descriptor).await,
        }
    }

    /// Delete every matching row.
    pub async fn delete(mut self) -> StoreResult<u64> {
        match &mut self.target {
            Target::Manager(manager) => manager.delete(&self.table, &self.descriptor).await,
            Target::Tx(tx) => tx.delete(&self.table, &self.descriptor).await,
        }
    }

    /// Insert-or-update keyed by `unique_key`, as a single conditional
    /// write. On the SQL backends the key column must carry a unique
    /// constraint; on Redis the write is atomic only when the key is `id`.
    pub async fn upsert(mut self, row: Row, unique_key: &str) -> StoreResult<InsertOutcome> {
        match &mut self.target {
            Target::Manager(manager) => manager.upsert(&self.table, row, unique_key).await,
            Target::Tx(tx) => tx.upsert(&self.table, row, unique_key).await,
        }
    }

    /// Fetch rows in batches of `size`, invoking `handler` per batch, until
    /// a batch comes back short.
    ///
    /// This is a windowed offset walk, not a stable cursor: it is only
    /// correct when the underlying data is not concurrently mutated during
    /// iteration. Batch order follows insertion order only where the
    /// backend preserves it (MongoDB and Redis make no such promise without
    /// an explicit `order_by`).
    pub async fn chunk<F>(mut self, size: u64, mut handler: F) -> StoreResult<()>
    where
        F: FnMut(Vec<Row>) -> BoxFuture<'static, StoreResult<()>> + Send,
    {
        if size == 0 {
            return Ok(());
        }

        let mut offset = self.descriptor.offset.unwrap_or(0);
        loop {
            let mut window = self.descriptor.clone();
            window.limit = Some(size);
            window.offset = Some(offset);

            let batch = Self::run_select(&mut self.target, &self.table, &window).await?;
            let fetched = batch.len() as u64;
            if fetched == 0 {
                break;
            }
            handler(batch).await?;
            if fetched < size {
                break;
            }
            offset += size;
        }
        Ok(())
    }
}
