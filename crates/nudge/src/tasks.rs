//! Task management commands.
//!
//! These edit the database directly. A running daemon picks the changes up
//! on its next reconciliation sweep.

use chrono::{DateTime, Utc};
use miette::Result;

use nudge_scheduler::{Owner, Task, TaskId};
use nudge_store::{NewTask, SqliteTaskStore, TaskUpdate};

use crate::due::{format_due, parse_due};

fn open(db: &str) -> Result<SqliteTaskStore> {
    SqliteTaskStore::open(db).map_err(|e| miette::miette!("failed to open database {}: {}", db, e))
}

pub fn add(
    db: &str,
    title: String,
    email: String,
    name: String,
    due: Option<&str>,
    description: Option<String>,
) -> Result<()> {
    let due_at = due.map(parse_due).transpose()?;
    let store = open(db)?;
    let task = store
        .create_task(NewTask {
            title,
            description,
            owner: Owner::new(email, name),
            due_at,
        })
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Added task {}", task.id);
    println!("{}", render_task(&task));
    Ok(())
}

pub fn list(db: &str) -> Result<()> {
    let store = open(db)?;
    let tasks = store.list_tasks().map_err(|e| miette::miette!("{}", e))?;

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for task in &tasks {
        println!("{}", render_row(task));
    }
    Ok(())
}

pub fn show(db: &str, id: TaskId) -> Result<()> {
    let store = open(db)?;
    let task = store
        .get_task(id)
        .map_err(|e| miette::miette!("{}", e))?
        .ok_or_else(|| miette::miette!("task {} not found", id))?;

    println!("{}", render_task(&task));
    Ok(())
}

pub fn update(
    db: &str,
    id: TaskId,
    title: Option<String>,
    description: Option<Option<String>>,
    due_at: Option<Option<DateTime<Utc>>>,
    reopen: bool,
) -> Result<()> {
    let store = open(db)?;
    let task = store
        .update_task(
            id,
            TaskUpdate {
                title,
                description,
                due_at,
                completed: reopen.then_some(false),
            },
        )
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Updated task {}", task.id);
    println!("{}", render_task(&task));
    Ok(())
}

pub fn complete(db: &str, id: TaskId) -> Result<()> {
    let store = open(db)?;
    store
        .update_task(
            id,
            TaskUpdate {
                completed: Some(true),
                ..Default::default()
            },
        )
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Completed task {}", id);
    Ok(())
}

pub fn delete(db: &str, id: TaskId) -> Result<()> {
    let store = open(db)?;
    if !store.delete_task(id).map_err(|e| miette::miette!("{}", e))? {
        return Err(miette::miette!("task {} not found", id));
    }

    println!("Deleted task {}", id);
    Ok(())
}

/// One line per task for `list`.
fn render_row(task: &Task) -> String {
    let status = match (task.completed, task.reminder_sent) {
        (true, _) => "done",
        (false, true) => "reminded",
        (false, false) => "open",
    };
    format!(
        "{:>4}  {:<8}  {:<20}  {}",
        task.id,
        status,
        format_due(task.due_at),
        task.title
    )
}

fn render_task(task: &Task) -> String {
    format!(
        "  Title:       {}\n  Description: {}\n  Owner:       {} <{}>\n  Due:         {}\n  Completed:   {}\n  Reminded:    {}",
        task.title,
        task.description.as_deref().unwrap_or("-"),
        task.owner.name,
        task.owner.email,
        format_due(task.due_at),
        task.completed,
        task.reminder_sent,
    )
}
