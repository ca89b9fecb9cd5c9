//! The shared column-definition vocabulary consumed by `create_table`.
//!
//! SQL variants translate this into native DDL, MongoDB uses only the
//! `unique`/`index` flags for index creation, and Redis persists the
//! definition as namespace metadata without enforcement.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The backend-neutral column type vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Auto-incrementing integer primary key.
    Increments,
    /// Bounded string; `None` length means the dialect default (255).
    VarChar { length: Option<u32> },
    /// Unbounded text.
    Text,
    Integer,
    Boolean,
    Timestamp,
    /// JSON document column.
    Json,
}

/// One column definition with its modifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub unique: bool,
    /// Request a secondary index on this column.
    pub index: bool,
    pub default: Option<Value>,
}

impl ColumnDef {
    fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            unique: false,
            index: false,
            default: None,
        }
    }

    /// Auto-incrementing integer primary key.
    pub fn increments(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Increments)
    }

    /// Bounded string column with the dialect-default length.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::VarChar { length: None })
    }

    /// Bounded string column with an explicit length.
    pub fn string_with_length(name: impl Into<String>, length: u32) -> Self {
        Self::new(
            name,
            ColumnKind::VarChar {
                length: Some(length),
            },
        )
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Boolean)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Timestamp)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Json)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A table (or collection / key namespace) definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn modifiers_chain() {
        let col = ColumnDef::string("email").unique().nullable().indexed();
        assert!(col.unique && col.nullable && col.index);
        assert_eq!(col.kind, ColumnKind::VarChar { length: None });

        let col = ColumnDef::integer("views").default_value(json!(0));
        assert_eq!(col.default, Some(json!(0)));
    }
}
