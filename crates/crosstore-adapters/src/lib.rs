//! # crosstore-adapters
//!
//! Backend adapters for CrossStore. Each variant translates the
//! backend-neutral operation set: select, insert, update, delete, upsert,
//! raw, DDL, transactions: into native driver calls:
//!
//! - [`sqlite::SqliteAdapter`]: embedded SQL over an sqlx pool
//! - [`postgres::PostgresAdapter`]: pooled SQL, `$n` placeholders
//! - [`mysql::MysqlAdapter`]: pooled SQL
//! - [`mongo::MongoAdapter`]: documents, session transactions
//! - [`redis::RedisAdapter`]: key-value, lossy query approximation
//!
//! The shared WHERE-clause translation lives in [`sql`]; the closed driver
//! constructor table lives in [`registry`].

pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod redis;
pub mod registry;
pub mod sql;
pub mod sqlite;
pub mod traits;

// ── re-exports ───────────────────────────────────────────────────────

pub use mongo::MongoAdapter;
pub use mysql::MysqlAdapter;
pub use postgres::PostgresAdapter;
pub use redis::RedisAdapter;
pub use sqlite::SqliteAdapter;
pub use traits::{Adapter, TxHandle};
