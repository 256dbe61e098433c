//! Task reminder scheduler for Nudge.
//!
//! This crate arms one-shot email reminders for to-do tasks:
//! - Each task with a due date gets at most one pending timer, keyed by task id
//! - Timers fire a fixed offset before the due date
//! - Fired reminders are re-validated against the task store before delivery
//! - All pending work is rebuilt from the task store after a restart

mod clock;
mod config;
mod error;
mod lifecycle;
mod message;
mod notifier;
mod scheduler;
mod store;
mod types;

pub use clock::{
    Clock, FireFuture, ManualClock, ManualTimer, SystemClock, Timer, TimerHandle, TokioTimer,
};
pub use config::ReminderConfig;
pub use error::{NotifyError, SchedulerError, StoreError};
pub use lifecycle::{Lifecycle, StartReport, SweepReport};
pub use message::ReminderMessage;
pub use notifier::Notifier;
pub use scheduler::ReminderScheduler;
pub use store::{MemoryTaskStore, TaskStore};
pub use types::{ArmOutcome, FireOutcome, Owner, ReminderJob, SkipReason, Task, TaskId};
