//! SQLite-backed task storage for Nudge.
//!
//! Holds the task records the reminder scheduler reads, plus the create,
//! update and delete operations the application performs on them.

mod db;
mod error;

pub use db::{NewTask, SqliteTaskStore, TaskUpdate};
pub use error::DbError;
