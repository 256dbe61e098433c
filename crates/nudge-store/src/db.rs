//! SQLite database for tasks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use tracing::{info, warn};

use nudge_scheduler::{Owner, StoreError, Task, TaskId, TaskStore};

use crate::DbError;

const TASK_COLUMNS: &str = "id, title, description, owner_email, owner_name, due_at, \
                            completed, reminder_sent, created_at, updated_at";

/// SQLite-backed task store.
///
/// Clones share one connection. The async [`TaskStore`] methods run their
/// queries on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

/// Fields for a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub owner: Owner,
    pub due_at: Option<DateTime<Utc>>,
}

/// A partial edit. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub completed: Option<bool>,
}

impl TaskUpdate {
    /// Apply the edit to a task, following the re-arming rule for due dates.
    pub fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(due_at) = self.due_at {
            task.set_due_at(due_at);
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
    }
}

/// A task row before its timestamps are parsed.
struct TaskRow {
    id: TaskId,
    title: String,
    description: Option<String>,
    owner_email: String,
    owner_name: String,
    due_at: Option<String>,
    completed: bool,
    reminder_sent: bool,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            owner_email: row.get(3)?,
            owner_name: row.get(4)?,
            due_at: row.get(5)?,
            completed: row.get(6)?,
            reminder_sent: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_task(self) -> Result<Task, DbError> {
        let id = self.id;
        let due_at = self
            .due_at
            .map(|v| parse_timestamp(id, "due_at", v))
            .transpose()?;
        Ok(Task {
            id,
            title: self.title,
            description: self.description,
            owner: Owner::new(self.owner_email, self.owner_name),
            due_at,
            completed: self.completed,
            reminder_sent: self.reminder_sent,
            created_at: parse_timestamp(id, "created_at", self.created_at)?,
            updated_at: parse_timestamp(id, "updated_at", self.updated_at)?,
        })
    }
}

fn parse_timestamp(id: TaskId, column: &'static str, value: String) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::InvalidTimestamp { id, column, value })
}

impl SqliteTaskStore {
    /// Open or create the SQLite database.
    pub fn open(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode so the daemon and CLI can share the file
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, path)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, path: &str) -> Result<Self, DbError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                owner_email TEXT NOT NULL,
                owner_name TEXT NOT NULL,
                due_at TEXT,
                completed INTEGER NOT NULL DEFAULT 0,
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_pending ON tasks(completed, reminder_sent);
            ",
        )?;

        info!(path = %path, "task database initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Application operations
    // =========================================================================

    /// Insert a task and return it with its assigned id.
    pub fn create_task(&self, new: NewTask) -> Result<Task, DbError> {
        let now = Utc::now();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO tasks
                 (title, description, owner_email, owner_name, due_at, completed, reminder_sent, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?6)",
                params![
                    new.title,
                    new.description,
                    new.owner.email,
                    new.owner.name,
                    new.due_at.map(|d| d.to_rfc3339()),
                    now.to_rfc3339(),
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.get_task(id)?.ok_or(DbError::NotFound(id))
    }

    /// Fetch a task by id.
    pub fn get_task(&self, id: TaskId) -> Result<Option<Task>, DbError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                TaskRow::from_row,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    /// Apply an edit and return the updated task.
    ///
    /// Changing the due date resets `reminder_sent`.
    pub fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task, DbError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                TaskRow::from_row,
            )
            .optional()?
            .ok_or(DbError::NotFound(id))?;
        let mut task = row.into_task()?;
        update.apply(&mut task);
        task.updated_at = Utc::now();

        tx.execute(
            "UPDATE tasks
             SET title = ?2, description = ?3, due_at = ?4, completed = ?5,
                 reminder_sent = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id,
                task.title,
                task.description,
                task.due_at.map(|d| d.to_rfc3339()),
                task.completed,
                task.reminder_sent,
                task.updated_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(task)
    }

    /// Delete a task. Returns whether it existed.
    pub fn delete_task(&self, id: TaskId) -> Result<bool, DbError> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// All tasks, soonest due first, undated last.
    pub fn list_tasks(&self) -> Result<Vec<Task>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks ORDER BY due_at IS NULL, due_at, id"
        ))?;
        let rows = stmt.query_map([], TaskRow::from_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.into_task()?);
        }
        Ok(tasks)
    }

    /// Open tasks whose reminder has not been sent.
    ///
    /// Rows that fail to decode are logged and skipped.
    pub fn list_pending_reminders(&self) -> Result<Vec<Task>, DbError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE completed = 0 AND reminder_sent = 0"
        ))?;
        let rows = stmt.query_map([], TaskRow::from_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            match row.map_err(DbError::from).and_then(TaskRow::into_task) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(error = %e, "skipping unreadable task row"),
            }
        }
        Ok(tasks)
    }

    /// Persist the reminder-sent flag.
    pub fn set_reminder_sent_flag(&self, id: TaskId, sent: bool) -> Result<(), DbError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE tasks SET reminder_sent = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, sent, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(id));
        }
        Ok(())
    }

    /// Set `reminder_sent` only if the task still has `due_at`.
    ///
    /// Returns `false` when no row matched: the task was deleted or its due
    /// date was edited since it was read.
    pub fn mark_reminder_sent_if_due(
        &self,
        id: TaskId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DbError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE tasks SET reminder_sent = 1, updated_at = ?3
             WHERE id = ?1 AND due_at IS ?2",
            params![id, due_at.map(|d| d.to_rfc3339()), Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    pub fn task_count(&self) -> Result<usize, DbError> {
        let conn = self.conn();
        Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| {
            row.get::<_, usize>(0)
        })?)
    }
}

impl SqliteTaskStore {
    /// Run a synchronous database call off the async worker threads.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteTaskStore) -> Result<T, DbError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Unavailable(format!("database task failed: {e}")))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn list_eligible(&self) -> Result<Vec<Task>, StoreError> {
        self.blocking(|store| store.list_pending_reminders()).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.blocking(move |store| store.get_task(id)).await
    }

    async fn mark_reminder_sent(
        &self,
        id: TaskId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        self.blocking(move |store| store.mark_reminder_sent_if_due(id, due_at))
            .await
    }
}

/// Extension trait for optional query results.
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
