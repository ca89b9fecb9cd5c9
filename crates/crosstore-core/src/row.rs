//! Row representation and operation outcomes.
//!
//! Every adapter speaks the same currency: a row is a JSON object mapping
//! column/field names to values, regardless of whether the backend stores
//! relational rows, documents, or serialized key-value blobs.

use serde_json::Value;

/// A single row or document, backend-neutral.
pub type Row = serde_json::Map<String, Value>;

/// Outcome of an `insert` (or `upsert`): the generated or supplied
/// identifier plus the affected-row count.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOutcome {
    /// The identifier of the written record. Integer for autoincrement SQL
    /// backends, hex string for MongoDB ObjectIds, string for Redis keys.
    pub id: Value,
    /// Number of rows/documents written.
    pub affected: u64,
}

/// Outcome of a raw query: rows for reads, an affected-count for writes.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    /// Result set from a read query.
    Rows(Vec<Row>),
    /// Affected-row count from a write statement.
    Affected(u64),
}

impl RawOutcome {
    /// The rows of a read result, or an empty slice for writes.
    pub fn rows(&self) -> &[Row] {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected(_) => &[],
        }
    }

    /// Number of rows returned or affected.
    pub fn count(&self) -> u64 {
        match self {
            Self::Rows(rows) => rows.len() as u64,
            Self::Affected(n) => *n,
        }
    }
}

/// Build a [`Row`] from a JSON object literal, panicking if the value is not
/// an object. Intended for tests and internal construction.
pub fn row_from_value(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected JSON object for row, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_outcome_counts() {
        let rows = RawOutcome::Rows(vec![row_from_value(json!({"a": 1}))]);
        assert_eq!(rows.count(), 1);
        assert_eq!(rows.rows().len(), 1);

        let affected = RawOutcome::Affected(3);
        assert_eq!(affected.count(), 3);
        assert!(affected.rows().is_empty());
    }
}
