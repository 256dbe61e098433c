//! Error types for the SQLite store.

use nudge_scheduler::{StoreError, TaskId};
use thiserror::Error;

/// Errors from the SQLite task store.
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No task with this id.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp in task {id} column {column}: {value}")]
    InvalidTimestamp {
        id: TaskId,
        column: &'static str,
        value: String,
    },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(id) => StoreError::NotFound(id),
            DbError::InvalidTimestamp { id, .. } => StoreError::InvalidRecord {
                id,
                reason: err.to_string(),
            },
            DbError::Sqlite(e) => StoreError::Unavailable(e.to_string()),
        }
    }
}
