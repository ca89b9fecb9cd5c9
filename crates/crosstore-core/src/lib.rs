//! # crosstore-core
//!
//! Backend-neutral value objects for CrossStore: connection configuration,
//! the query-descriptor predicate algebra, the table-definition vocabulary,
//! the uniform row representation, and the error taxonomy.
//!
//! Nothing in this crate touches a network or a file handle beyond reading
//! configuration; the adapters crate translates these values into native
//! driver calls.

pub mod config;
pub mod error;
pub mod query;
pub mod row;
pub mod schema;

// ── re-exports ───────────────────────────────────────────────────────

pub use config::{Driver, DriverOptions, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use query::{CmpOp, Direction, Ordering, Predicate, QueryDescriptor};
pub use row::{InsertOutcome, RawOutcome, Row};
pub use schema::{ColumnDef, ColumnKind, TableDef};
