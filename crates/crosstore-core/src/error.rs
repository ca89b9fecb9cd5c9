//! Error types for the CrossStore layer.
//!
//! All operations return [`StoreError`] via [`StoreResult`]. Adapter-level
//! failures are wrapped exactly once into [`StoreError::Backend`] with a
//! normalized message and never swallowed; retry policy belongs to the
//! caller.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage abstraction layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The configured `driver` string does not name a supported backend.
    #[error("unsupported driver: `{0}`")]
    UnsupportedDriver(String),

    /// An operation was attempted before `connect()` (or after `close()`).
    #[error("not connected: call connect() before issuing operations")]
    NotConnected,

    /// A native driver call failed. Wraps the driver error once, with a
    /// normalized `<backend> <operation> failed: <message>` rendering.
    #[error("{backend} {operation} failed: {message}")]
    Backend {
        backend: &'static str,
        operation: &'static str,
        message: String,
    },

    /// A migration's `up()` or `down()` failed. Carries the migration name.
    #[error("migration `{name}` failed: {message}")]
    Migration { name: String, message: String },

    /// A transaction rolled back. Carries the original cause.
    #[error("transaction aborted and rolled back: {source}")]
    TransactionAborted {
        #[source]
        source: Box<StoreError>,
    },

    /// Invalid or incomplete connection configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The active backend cannot express the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl StoreError {
    /// Wrap a native driver failure with the normalized backend message.
    pub fn backend(
        backend: &'static str,
        operation: &'static str,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Backend {
            backend,
            operation,
            message: err.to_string(),
        }
    }

    /// Wrap the original cause of a rolled-back transaction.
    pub fn aborted(cause: StoreError) -> Self {
        Self::TransactionAborted {
            source: Box::new(cause),
        }
    }
}
