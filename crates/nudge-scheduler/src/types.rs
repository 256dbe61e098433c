//! Task and reminder types.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Task identity as assigned by the task store.
pub type TaskId = i64;

/// The user a reminder is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Recipient address.
    pub email: String,
    /// Name used in the greeting.
    pub name: String,
}

impl Owner {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }
}

/// A to-do task as seen by the reminder scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned id.
    pub id: TaskId,
    /// Short title, used as the reminder subject.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Who receives the reminder.
    pub owner: Owner,
    /// When the task is due. No due date means no reminder.
    pub due_at: Option<DateTime<Utc>>,
    /// Whether the task has been completed.
    pub completed: bool,
    /// Whether the reminder for the current `due_at` has been sent.
    pub reminder_sent: bool,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new open task.
    pub fn new(
        id: TaskId,
        title: impl Into<String>,
        owner: Owner,
        due_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: None,
            owner,
            due_at,
            completed: false,
            reminder_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The instant the reminder should fire, if the task has a due date.
    pub fn fire_at(&self, offset: Duration) -> Option<DateTime<Utc>> {
        self.due_at.map(|due| due - offset)
    }

    /// Decide whether a reminder can be armed at `now`.
    ///
    /// Returns the fire time when eligible, or the reason it is not.
    /// A fire time equal to `now` counts as elapsed.
    pub fn eligibility(
        &self,
        now: DateTime<Utc>,
        offset: Duration,
    ) -> Result<DateTime<Utc>, SkipReason> {
        if self.completed {
            return Err(SkipReason::Completed);
        }
        if self.reminder_sent {
            return Err(SkipReason::AlreadySent);
        }
        let fire_at = self.fire_at(offset).ok_or(SkipReason::NoDueDate)?;
        if fire_at <= now {
            return Err(SkipReason::WindowElapsed);
        }
        Ok(fire_at)
    }

    /// Check if a reminder can be armed at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>, offset: Duration) -> bool {
        self.eligibility(now, offset).is_ok()
    }

    /// Change the due date.
    ///
    /// A different due date re-arms the reminder: `reminder_sent` goes back
    /// to false. Setting the same value leaves the flag alone.
    pub fn set_due_at(&mut self, due_at: Option<DateTime<Utc>>) {
        if self.due_at != due_at {
            self.due_at = due_at;
            self.reminder_sent = false;
        }
    }
}

/// Why a task was not armed or not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Task has no due date.
    NoDueDate,
    /// Task is completed.
    Completed,
    /// Reminder for this due date already went out.
    AlreadySent,
    /// Fire time is not in the future.
    WindowElapsed,
    /// Task no longer exists in the store.
    Missing,
    /// Due date changed after the timer was armed.
    DueDateMoved,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoDueDate => "no due date",
            SkipReason::Completed => "completed",
            SkipReason::AlreadySent => "reminder already sent",
            SkipReason::WindowElapsed => "reminder window elapsed",
            SkipReason::Missing => "task missing",
            SkipReason::DueDateMoved => "due date moved",
        };
        f.write_str(s)
    }
}

/// Result of arming a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// A timer is now pending. `replaced` is true when an older timer for
    /// the same task was cancelled.
    Armed {
        fire_at: DateTime<Utc>,
        replaced: bool,
    },
    /// Nothing was armed.
    Skipped(SkipReason),
}

impl ArmOutcome {
    pub fn is_armed(&self) -> bool {
        matches!(self, ArmOutcome::Armed { .. })
    }
}

/// Result of a reminder firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The notifier accepted the reminder and it was marked sent.
    Delivered,
    /// The notifier failed. `marked_sent` reports whether the flag was
    /// still persisted.
    DeliveryFailed { marked_sent: bool },
    /// The task was re-validated and no longer qualifies.
    Skipped(SkipReason),
    /// The task could not be read at fire time.
    StoreUnavailable,
    /// The timer was replaced or disarmed before it could claim the job,
    /// or another delivery for the task is in flight.
    Superseded,
}

/// Snapshot of a pending reminder job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderJob {
    /// Task the job belongs to.
    pub task_id: TaskId,
    /// When the timer triggers.
    pub fire_at: DateTime<Utc>,
    /// When the job was armed.
    pub armed_at: DateTime<Utc>,
}
