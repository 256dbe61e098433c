//! Task store contract and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{StoreError, Task, TaskId};

/// The fields of task storage the scheduler reads and writes.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Every task that is not completed and has not had its reminder sent.
    async fn list_eligible(&self) -> Result<Vec<Task>, StoreError>;

    /// Fetch a task by id.
    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Set `reminder_sent` only if the task still has the given due date.
    ///
    /// The check and the write are one atomic step. Returns `false` when the
    /// task is gone or its due date no longer matches.
    async fn mark_reminder_sent(
        &self,
        id: TaskId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;
}

/// Task store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<BTreeMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, BTreeMap<TaskId, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a task.
    pub fn insert(&self, task: Task) {
        self.tasks().insert(task.id, task);
    }

    /// Apply `edit` to a stored task and return the result.
    ///
    /// Use [`Task::set_due_at`] inside `edit` to keep the re-arming rule.
    pub fn update(&self, id: TaskId, edit: impl FnOnce(&mut Task)) -> Option<Task> {
        let mut tasks = self.tasks();
        let task = tasks.get_mut(&id)?;
        edit(task);
        task.updated_at = Utc::now();
        Some(task.clone())
    }

    /// Remove a task.
    pub fn remove(&self, id: TaskId) -> Option<Task> {
        self.tasks().remove(&id)
    }

    /// Current copy of a task.
    pub fn snapshot(&self, id: TaskId) -> Option<Task> {
        self.tasks().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn list_eligible(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks()
            .values()
            .filter(|t| !t.completed && !t.reminder_sent)
            .cloned()
            .collect())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn mark_reminder_sent(
        &self,
        id: TaskId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut tasks = self.tasks();
        match tasks.get_mut(&id) {
            Some(task) if task.due_at == due_at => {
                task.reminder_sent = true;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
