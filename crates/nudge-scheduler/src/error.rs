//! Error types for the scheduler and its collaborators.

use thiserror::Error;

use crate::TaskId;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task store error.
    #[error("task store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid scheduler configuration.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// Errors reported by a [`crate::TaskStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or queried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No task with this id.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A stored record could not be decoded.
    #[error("invalid task record {id}: {reason}")]
    InvalidRecord { id: TaskId, reason: String },
}

/// Errors reported by a [`crate::Notifier`].
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The message could not be handed to the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport answered but refused the message.
    #[error("delivery rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The notifier is misconfigured.
    #[error("invalid notifier configuration: {0}")]
    InvalidConfig(String),
}
