//! Dialect-aware SQL composition shared by the three SQL variants.
//!
//! Every statement is rendered with `?` placeholders, one per value, in
//! predicate declaration order: parameters never appear inline. The
//! PostgreSQL variant rewrites `?` to `$1, $2, …` via
//! [`numbered_placeholders`] immediately before dispatch.

use serde_json::Value;

use crosstore_core::query::Predicate;
use crosstore_core::schema::{ColumnDef, ColumnKind};
use crosstore_core::{Direction, QueryDescriptor, Row, TableDef};

/// The SQL dialects CrossStore speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    /// Quote an identifier, escaping any embedded quote characters.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Self::Mysql => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Render one column type from the shared vocabulary.
    fn column_type(self, kind: &ColumnKind) -> String {
        match kind {
            ColumnKind::Increments => match self {
                Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT".into(),
                Self::Postgres => "SERIAL PRIMARY KEY".into(),
                Self::Mysql => "INT AUTO_INCREMENT PRIMARY KEY".into(),
            },
            ColumnKind::VarChar { length } => format!("VARCHAR({})", length.unwrap_or(255)),
            ColumnKind::Text => "TEXT".into(),
            ColumnKind::Integer => match self {
                Self::Mysql => "INT".into(),
                _ => "INTEGER".into(),
            },
            ColumnKind::Boolean => match self {
                Self::Mysql => "TINYINT(1)".into(),
                _ => "BOOLEAN".into(),
            },
            ColumnKind::Timestamp => match self {
                Self::Postgres => "TIMESTAMPTZ".into(),
                Self::Mysql => "DATETIME".into(),
                Self::Sqlite => "TIMESTAMP".into(),
            },
            ColumnKind::Json => match self {
                Self::Postgres => "JSONB".into(),
                Self::Mysql => "JSON".into(),
                Self::Sqlite => "TEXT".into(),
            },
        }
    }
}

/// A rendered statement plus its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

// ---------------------------------------------------------------------------
// WHERE / ORDER BY / paging
// ---------------------------------------------------------------------------

/// Render the predicate list as `WHERE … AND …` with one placeholder per
/// value, in declaration order. Returns an empty string when unfiltered.
fn where_clause(dialect: Dialect, query: &QueryDescriptor, params: &mut Vec<Value>) -> String {
    if query.filter.is_empty() {
        return String::new();
    }

    let mut terms = Vec::with_capacity(query.filter.len());
    for (field, predicate) in &query.filter {
        let column = dialect.quote(field);
        match predicate {
            // A null equality is meaningless in SQL (`= NULL` never
            // matches); treat it as IS NULL.
            Predicate::Eq(Value::Null) | Predicate::IsNull => {
                terms.push(format!("{column} IS NULL"));
            }
            Predicate::Eq(value) => {
                terms.push(format!("{column} = ?"));
                params.push(value.clone());
            }
            Predicate::In(values) if values.is_empty() => {
                // IN () is invalid SQL; an empty list matches nothing.
                terms.push("1 = 0".into());
            }
            Predicate::In(values) => {
                let placeholders = vec!["?"; values.len()].join(", ");
                terms.push(format!("{column} IN ({placeholders})"));
                params.extend(values.iter().cloned());
            }
            Predicate::Cmp { op, value } => {
                terms.push(format!("{column} {} ?", op.sql()));
                params.push(value.clone());
            }
        }
    }
    format!(" WHERE {}", terms.join(" AND "))
}

/// Render `ORDER BY` plus `LIMIT`/`OFFSET`. Limits are inlined as numeric
/// literals. MySQL and SQLite cannot express OFFSET without LIMIT, so an
/// offset-only descriptor gets the dialect's "unbounded" limit.
fn tail_clause(dialect: Dialect, query: &QueryDescriptor) -> String {
    let mut tail = String::new();

    if !query.order_by.is_empty() {
        let terms: Vec<String> = query
            .order_by
            .iter()
            .map(|o| {
                let dir = match o.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!("{} {dir}", dialect.quote(&o.field))
            })
            .collect();
        tail.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }

    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => {
            tail.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        }
        (Some(limit), None) => tail.push_str(&format!(" LIMIT {limit}")),
        (None, Some(offset)) => match dialect {
            Dialect::Postgres => tail.push_str(&format!(" OFFSET {offset}")),
            Dialect::Sqlite => tail.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            Dialect::Mysql => {
                tail.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {offset}"));
            }
        },
        (None, None) => {}
    }
    tail
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

pub fn select(dialect: Dialect, table: &str, query: &QueryDescriptor) -> SqlQuery {
    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|c| dialect.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut params = Vec::new();
    let mut sql = format!("SELECT {columns} FROM {}", dialect.quote(table));
    sql.push_str(&where_clause(dialect, query, &mut params));
    sql.push_str(&tail_clause(dialect, query));
    SqlQuery { sql, params }
}

pub fn count(dialect: Dialect, table: &str, query: &QueryDescriptor) -> SqlQuery {
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT(*) FROM {}", dialect.quote(table));
    sql.push_str(&where_clause(dialect, query, &mut params));
    SqlQuery { sql, params }
}

pub fn insert(dialect: Dialect, table: &str, row: &Row) -> SqlQuery {
    let columns: Vec<String> = row.keys().map(|k| dialect.quote(k)).collect();
    let placeholders = vec!["?"; row.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote(table),
        columns.join(", "),
        placeholders,
    );
    SqlQuery {
        sql,
        params: row.values().cloned().collect(),
    }
}

pub fn update(dialect: Dialect, table: &str, changes: &Row, query: &QueryDescriptor) -> SqlQuery {
    let assignments: Vec<String> = changes
        .keys()
        .map(|k| format!("{} = ?", dialect.quote(k)))
        .collect();

    let mut params: Vec<Value> = changes.values().cloned().collect();
    let mut sql = format!(
        "UPDATE {} SET {}",
        dialect.quote(table),
        assignments.join(", "),
    );
    sql.push_str(&where_clause(dialect, query, &mut params));
    SqlQuery { sql, params }
}

pub fn delete(dialect: Dialect, table: &str, query: &QueryDescriptor) -> SqlQuery {
    let mut params = Vec::new();
    let mut sql = format!("DELETE FROM {}", dialect.quote(table));
    sql.push_str(&where_clause(dialect, query, &mut params));
    SqlQuery { sql, params }
}

/// Single-statement conditional write keyed by `unique_key`.
///
/// SQLite/PostgreSQL use `ON CONFLICT`, MySQL `ON DUPLICATE KEY UPDATE`.
/// The key column must carry a unique constraint for the conflict clause to
/// fire. When the row holds nothing but the key, the conflict degrades to a
/// no-op rather than an empty SET list.
pub fn upsert(dialect: Dialect, table: &str, row: &Row, unique_key: &str) -> SqlQuery {
    let base = insert(dialect, table, row);
    let non_key: Vec<&String> = row.keys().filter(|k| k.as_str() != unique_key).collect();

    let clause = match dialect {
        Dialect::Sqlite | Dialect::Postgres => {
            if non_key.is_empty() {
                format!(" ON CONFLICT ({}) DO NOTHING", dialect.quote(unique_key))
            } else {
                let assignments: Vec<String> = non_key
                    .iter()
                    .map(|k| {
                        let col = dialect.quote(k);
                        format!("{col} = excluded.{col}")
                    })
                    .collect();
                format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    dialect.quote(unique_key),
                    assignments.join(", "),
                )
            }
        }
        Dialect::Mysql => {
            if non_key.is_empty() {
                let key = dialect.quote(unique_key);
                format!(" ON DUPLICATE KEY UPDATE {key} = {key}")
            } else {
                let assignments: Vec<String> = non_key
                    .iter()
                    .map(|k| {
                        let col = dialect.quote(k);
                        format!("{col} = VALUES({col})")
                    })
                    .collect();
                format!(" ON DUPLICATE KEY UPDATE {}", assignments.join(", "))
            }
        }
    };

    SqlQuery {
        sql: format!("{}{clause}", base.sql),
        params: base.params,
    }
}

// ---------------------------------------------------------------------------
// DDL
// ---------------------------------------------------------------------------

fn column_ddl(dialect: Dialect, column: &ColumnDef) -> String {
    let mut ddl = format!(
        "{} {}",
        dialect.quote(&column.name),
        dialect.column_type(&column.kind),
    );

    // Increments already implies PRIMARY KEY and NOT NULL.
    if column.kind != ColumnKind::Increments {
        if !column.nullable {
            ddl.push_str(" NOT NULL");
        }
        if column.unique {
            ddl.push_str(" UNIQUE");
        }
        if let Some(default) = &column.default {
            ddl.push_str(&format!(" DEFAULT {}", default_literal(default)));
        }
    }
    ddl
}

/// Render a DEFAULT literal. Only scalars are expected here; anything else
/// is embedded as a quoted JSON string.
fn default_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Render `CREATE TABLE IF NOT EXISTS` plus one `CREATE INDEX` per indexed
/// column. MySQL lacks `IF NOT EXISTS` on `CREATE INDEX`; its adapter
/// tolerates the duplicate-index error instead.
pub fn create_table(dialect: Dialect, table: &TableDef) -> Vec<String> {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_ddl(dialect, c))
        .collect();

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        dialect.quote(&table.name),
        columns.join(", "),
    )];

    for column in table.columns.iter().filter(|c| c.index) {
        let if_not_exists = match dialect {
            Dialect::Mysql => "",
            _ => "IF NOT EXISTS ",
        };
        statements.push(format!(
            "CREATE INDEX {if_not_exists}{} ON {} ({})",
            dialect.quote(&format!("idx_{}_{}", table.name, column.name)),
            dialect.quote(&table.name),
            dialect.quote(&column.name),
        ));
    }
    statements
}

pub fn drop_table(dialect: Dialect, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", dialect.quote(table))
}

// ---------------------------------------------------------------------------
// Placeholder and read/write classification helpers
// ---------------------------------------------------------------------------

/// Rewrite `?` placeholders to PostgreSQL's positional `$1, $2, …`,
/// skipping question marks inside single-quoted literals.
pub fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0u32;
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                // A doubled '' inside a literal toggles twice, which is
                // harmless for placeholder detection.
                in_string = !in_string;
                out.push(c);
            }
            '?' if !in_string => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

/// Whether a raw query returns rows (read) or an affected-count (write).
pub fn is_read_query(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(head.as_str(), "SELECT" | "WITH" | "SHOW" | "PRAGMA" | "EXPLAIN")
}
