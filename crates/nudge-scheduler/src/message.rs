//! Reminder message composition.

use crate::Task;

/// Due date format used in reminder bodies.
const DUE_FORMAT: &str = "%B %d, %Y at %I:%M %p UTC";

/// Subject and plain-text body of a reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderMessage {
    pub subject: String,
    pub body: String,
}

impl ReminderMessage {
    /// Compose the reminder for a task from its current state.
    pub fn for_task(task: &Task) -> Self {
        let description = task
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("N/A");
        let due = task
            .due_at
            .map(|d| d.format(DUE_FORMAT).to_string())
            .unwrap_or_else(|| "no due date".to_string());

        let body = format!(
            "Hi {name},\n\n\
             This is a reminder for your upcoming task:\n\n\
             Task: {title}\n\
             Description: {description}\n\
             Due: {due}\n\n\
             Don't forget to complete it on time!\n",
            name = task.owner.name,
            title = task.title,
        );

        Self {
            subject: format!("Reminder: {}", task.title),
            body,
        }
    }
}
