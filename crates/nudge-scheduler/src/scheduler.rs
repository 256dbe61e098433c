//! Reminder scheduler implementation.
//!
//! The job table maps each task id to at most one pending timer. Arming,
//! disarming and the fire-path claim all happen under one table lock; task
//! store and notifier I/O happen with the lock released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    ArmOutcome, Clock, FireOutcome, Notifier, ReminderConfig, ReminderJob, ReminderMessage,
    SchedulerError, SkipReason, SystemClock, Task, TaskId, TaskStore, Timer, TimerHandle,
    TokioTimer,
};

/// A pending reminder in the job table.
struct JobEntry {
    fire_at: DateTime<Utc>,
    armed_at: DateTime<Utc>,
    generation: u64,
    timer: TimerHandle,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<TaskId, JobEntry>,
    /// Task ids whose reminder is being delivered right now.
    in_flight: HashSet<TaskId>,
    next_generation: u64,
}

impl JobTable {
    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}

struct Inner {
    config: ReminderConfig,
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
    table: Mutex<JobTable>,
}

/// Clears a task's in-flight mark when delivery ends, however it ends.
struct InFlightGuard<'a> {
    table: &'a Mutex<JobTable>,
    task_id: TaskId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .remove(&self.task_id);
    }
}

/// Arms, cancels and fires one-shot task reminders.
///
/// Cloning is cheap; clones share the same job table.
#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

impl ReminderScheduler {
    /// Create a scheduler on the system clock with tokio timers.
    pub fn new(
        config: ReminderConfig,
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, SchedulerError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let timer = Arc::new(TokioTimer::new(Arc::clone(&clock)));
        Self::with_clock(config, store, notifier, clock, timer)
    }

    /// Create a scheduler with an explicit clock and timer service.
    pub fn with_clock(
        config: ReminderConfig,
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn Timer>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                notifier,
                clock,
                timer,
                table: Mutex::new(JobTable::default()),
            }),
        })
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.inner.config
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    fn table(&self) -> MutexGuard<'_, JobTable> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm a reminder for `task`, replacing any pending one.
    ///
    /// Ineligible tasks are skipped and leave an existing job untouched;
    /// callers that need a clean slate disarm first.
    pub fn arm(&self, task: &Task) -> ArmOutcome {
        self.arm_unless_newer(task, None)
            .unwrap_or(ArmOutcome::Skipped(SkipReason::DueDateMoved))
    }

    /// Arm `task` unless its current job was armed at or after `mark`.
    ///
    /// Returns `None` when a newer job won. `mark` comes from
    /// [`ReminderScheduler::generation_mark`].
    pub(crate) fn arm_unless_newer(&self, task: &Task, mark: Option<u64>) -> Option<ArmOutcome> {
        let now = self.inner.clock.now();
        let fire_at = match task.eligibility(now, self.inner.config.offset) {
            Ok(fire_at) => fire_at,
            Err(reason) => {
                debug!(task_id = task.id, reason = %reason, "task not eligible, not arming");
                return Some(ArmOutcome::Skipped(reason));
            }
        };

        let mut table = self.table();
        if let (Some(mark), Some(entry)) = (mark, table.jobs.get(&task.id)) {
            if entry.generation >= mark {
                return None;
            }
        }

        let replaced = match table.jobs.remove(&task.id) {
            Some(previous) => {
                previous.timer.cancel();
                true
            }
            None => false,
        };

        let generation = table.bump_generation();
        let weak = Arc::downgrade(&self.inner);
        let task_id = task.id;
        let timer = self.inner.timer.schedule(
            fire_at,
            Box::pin(async move {
                if let Some(scheduler) = Self::upgrade(&weak) {
                    scheduler.fire_scheduled(task_id, generation).await;
                }
            }),
        );

        table.jobs.insert(
            task_id,
            JobEntry {
                fire_at,
                armed_at: now,
                generation,
                timer,
            },
        );

        info!(task_id, fire_at = %fire_at, replaced, "armed reminder");
        Some(ArmOutcome::Armed { fire_at, replaced })
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Cancel and forget the pending reminder for `task_id`.
    ///
    /// Returns whether a job existed. Disarming an unknown id is a no-op.
    pub fn disarm(&self, task_id: TaskId) -> bool {
        let removed = self.table().jobs.remove(&task_id);
        match removed {
            Some(entry) => {
                entry.timer.cancel();
                info!(task_id, fire_at = %entry.fire_at, "disarmed reminder");
                true
            }
            None => false,
        }
    }

    /// Disarm `task_id` only if its job was armed before `mark`.
    pub(crate) fn disarm_older_than(&self, task_id: TaskId, mark: u64) -> bool {
        let removed = {
            let mut table = self.table();
            match table.jobs.get(&task_id) {
                Some(entry) if entry.generation < mark => table.jobs.remove(&task_id),
                _ => None,
            }
        };
        match removed {
            Some(entry) => {
                entry.timer.cancel();
                info!(task_id, "disarmed reminder for task that is no longer eligible");
                true
            }
            None => false,
        }
    }

    /// Cancel every pending reminder. Returns how many were cancelled.
    pub fn disarm_all(&self) -> usize {
        let jobs: Vec<_> = self.table().jobs.drain().collect();
        let count = jobs.len();
        for (_, entry) in jobs {
            entry.timer.cancel();
        }
        if count > 0 {
            info!(count, "disarmed all reminders");
        }
        count
    }

    /// Generation number the next armed job will get.
    ///
    /// Jobs with a generation at or above a mark were armed after it was
    /// taken.
    pub(crate) fn generation_mark(&self) -> u64 {
        self.table().next_generation
    }

    /// The pending job for a task, if any.
    pub fn job(&self, task_id: TaskId) -> Option<ReminderJob> {
        self.table().jobs.get(&task_id).map(|entry| ReminderJob {
            task_id,
            fire_at: entry.fire_at,
            armed_at: entry.armed_at,
        })
    }

    /// All pending jobs, ordered by fire time.
    pub fn jobs(&self) -> Vec<ReminderJob> {
        let mut jobs: Vec<_> = self
            .table()
            .jobs
            .iter()
            .map(|(&task_id, entry)| ReminderJob {
                task_id,
                fire_at: entry.fire_at,
                armed_at: entry.armed_at,
            })
            .collect();
        jobs.sort_by_key(|j| (j.fire_at, j.task_id));
        jobs
    }

    pub fn job_count(&self) -> usize {
        self.table().jobs.len()
    }

    pub fn is_armed(&self, task_id: TaskId) -> bool {
        self.table().jobs.contains_key(&task_id)
    }

    /// Fire the reminder for `task_id` now.
    ///
    /// Any pending job for the task is consumed. The task is re-read from
    /// the store and only delivered if it still qualifies.
    #[tracing::instrument(skip(self))]
    pub async fn on_fire(&self, task_id: TaskId) -> FireOutcome {
        let claimed = {
            let mut table = self.table();
            if table.in_flight.contains(&task_id) {
                debug!(task_id, "reminder already in flight");
                return FireOutcome::Superseded;
            }
            let expected = table.jobs.remove(&task_id).map(|entry| {
                entry.timer.cancel();
                entry.fire_at
            });
            table.in_flight.insert(task_id);
            expected
        };

        let _guard = InFlightGuard {
            table: &self.inner.table,
            task_id,
        };
        self.deliver(task_id, claimed).await
    }

    /// Timer entry point. Only the job that armed this timer may claim it.
    async fn fire_scheduled(&self, task_id: TaskId, generation: u64) -> FireOutcome {
        let expected = {
            let mut table = self.table();
            match table.jobs.get(&task_id) {
                Some(entry) if entry.generation == generation => {}
                _ => {
                    debug!(task_id, generation, "stale timer fired, job was replaced or disarmed");
                    return FireOutcome::Superseded;
                }
            }
            let Some(entry) = table.jobs.remove(&task_id) else {
                return FireOutcome::Superseded;
            };
            if !table.in_flight.insert(task_id) {
                warn!(task_id, "reminder fired while another delivery is in flight, dropping");
                return FireOutcome::Superseded;
            }
            entry.fire_at
        };

        let _guard = InFlightGuard {
            table: &self.inner.table,
            task_id,
        };
        self.deliver(task_id, Some(expected)).await
    }

    /// Re-validate and deliver. The caller holds the in-flight mark.
    async fn deliver(&self, task_id: TaskId, expected_fire_at: Option<DateTime<Utc>>) -> FireOutcome {
        let task = match self.inner.store.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                info!(task_id, "task no longer exists, skipping reminder");
                return FireOutcome::Skipped(SkipReason::Missing);
            }
            Err(e) => {
                error!(task_id, error = %e, "failed to load task at fire time, skipping reminder");
                return FireOutcome::StoreUnavailable;
            }
        };

        if let Some(reason) = self.fire_skip_reason(&task, expected_fire_at) {
            info!(task_id, reason = %reason, "skipping reminder");
            return FireOutcome::Skipped(reason);
        }

        let message = ReminderMessage::for_task(&task);
        let result = self
            .inner
            .notifier
            .send(&task.owner.email, &message.subject, &message.body)
            .await;

        match result {
            Ok(()) => {
                info!(task_id, to = %task.owner.email, "reminder delivered");
                self.mark_sent(&task).await;
                FireOutcome::Delivered
            }
            Err(e) if self.inner.config.retry_on_failure => {
                warn!(task_id, error = %e, "reminder delivery failed, leaving it unsent");
                FireOutcome::DeliveryFailed { marked_sent: false }
            }
            Err(e) => {
                warn!(task_id, error = %e, "reminder delivery failed, marking sent anyway");
                let marked_sent = self.mark_sent(&task).await;
                FireOutcome::DeliveryFailed { marked_sent }
            }
        }
    }

    fn fire_skip_reason(
        &self,
        task: &Task,
        expected_fire_at: Option<DateTime<Utc>>,
    ) -> Option<SkipReason> {
        if task.completed {
            return Some(SkipReason::Completed);
        }
        if task.reminder_sent {
            return Some(SkipReason::AlreadySent);
        }
        let fire_at = match task.fire_at(self.inner.config.offset) {
            Some(fire_at) => fire_at,
            None => return Some(SkipReason::NoDueDate),
        };
        match expected_fire_at {
            Some(expected) if expected != fire_at => Some(SkipReason::DueDateMoved),
            _ => None,
        }
    }

    /// Persist `reminder_sent` for the due date that was just delivered.
    ///
    /// The store only sets the flag if the due date is unchanged, since after
    /// an edit the flag belongs to the new due date.
    async fn mark_sent(&self, delivered: &Task) -> bool {
        let task_id = delivered.id;
        match self
            .inner
            .store
            .mark_reminder_sent(task_id, delivered.due_at)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                info!(task_id, "task deleted or due date changed during delivery, not marking sent");
                false
            }
            Err(e) => {
                error!(task_id, error = %e, "failed to persist reminder_sent");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, ManualTimer, MemoryTaskStore, NotifyError, Owner};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), NotifyError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NotifyError::Transport("smtp down".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string()));
            Ok(())
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        timer: Arc<ManualTimer>,
        store: Arc<MemoryTaskStore>,
        notifier: Arc<RecordingNotifier>,
        scheduler: ReminderScheduler,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn harness(config: ReminderConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let timer = Arc::new(ManualTimer::new());
        let store = Arc::new(MemoryTaskStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = ReminderScheduler::with_clock(
            config,
            store.clone(),
            notifier.clone(),
            clock.clone(),
            timer.clone(),
        )
        .unwrap();
        Harness {
            clock,
            timer,
            store,
            notifier,
            scheduler,
        }
    }

    fn task_due_in(id: TaskId, minutes: i64) -> Task {
        Task::new(
            id,
            format!("task {id}"),
            Owner::new("ada@example.com", "Ada"),
            Some(t0() + Duration::minutes(minutes)),
        )
    }

    impl Harness {
        async fn advance_to(&self, at: DateTime<Utc>) -> usize {
            self.clock.set(at);
            self.timer.fire_due(at).await
        }
    }

    #[tokio::test]
    async fn test_fires_offset_before_due() {
        let h = harness(ReminderConfig::default());
        let task = task_due_in(1, 40);
        h.store.insert(task.clone());

        let outcome = h.scheduler.arm(&task);
        assert_eq!(
            outcome,
            ArmOutcome::Armed {
                fire_at: t0() + Duration::minutes(10),
                replaced: false
            }
        );

        assert_eq!(h.advance_to(t0() + Duration::minutes(9)).await, 0);
        assert!(h.notifier.sent().is_empty());

        assert_eq!(h.advance_to(t0() + Duration::minutes(10)).await, 1);
        assert_eq!(
            h.notifier.sent(),
            vec![("ada@example.com".to_string(), "Reminder: task 1".to_string())]
        );
        assert!(h.store.snapshot(1).unwrap().reminder_sent);
        assert_eq!(h.scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn test_elapsed_window_is_not_armed() {
        let h = harness(ReminderConfig::default());
        let task = task_due_in(1, 10);

        assert_eq!(
            h.scheduler.arm(&task),
            ArmOutcome::Skipped(SkipReason::WindowElapsed)
        );
        assert_eq!(h.scheduler.job_count(), 0);
        assert_eq!(h.timer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_rearm_replaces_timer() {
        let h = harness(ReminderConfig::default());
        let mut task = task_due_in(1, 60);
        h.store.insert(task.clone());

        h.scheduler.arm(&task);
        task.set_due_at(Some(t0() + Duration::minutes(90)));
        h.store.insert(task.clone());
        let outcome = h.scheduler.arm(&task);

        assert!(matches!(outcome, ArmOutcome::Armed { replaced: true, .. }));
        assert_eq!(h.scheduler.job_count(), 1);
        assert_eq!(h.timer.pending_count(), 1);
        assert_eq!(h.timer.deadlines(), vec![t0() + Duration::minutes(60)]);

        // The old deadline passes without a delivery.
        assert_eq!(h.advance_to(t0() + Duration::minutes(30)).await, 0);
        assert!(h.notifier.sent().is_empty());

        assert_eq!(h.advance_to(t0() + Duration::minutes(60)).await, 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_disarm_is_idempotent() {
        let h = harness(ReminderConfig::default());
        let task = task_due_in(1, 60);

        assert!(!h.scheduler.disarm(1));
        h.scheduler.arm(&task);
        assert!(h.scheduler.disarm(1));
        assert!(!h.scheduler.disarm(1));
        assert_eq!(h.timer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_completed_before_fire_sends_nothing() {
        let h = harness(ReminderConfig::default());
        let task = task_due_in(1, 60);
        h.store.insert(task.clone());
        h.scheduler.arm(&task);

        h.store.update(1, |t| t.completed = true);
        let before = h.store.snapshot(1).unwrap();

        assert_eq!(h.advance_to(t0() + Duration::minutes(30)).await, 1);
        assert!(h.notifier.sent().is_empty());
        assert_eq!(h.store.snapshot(1).unwrap(), before);
    }

    #[tokio::test]
    async fn test_on_fire_reports_skip_reasons() {
        let h = harness(ReminderConfig::default());

        assert_eq!(
            h.scheduler.on_fire(42).await,
            FireOutcome::Skipped(SkipReason::Missing)
        );

        let mut task = task_due_in(1, 60);
        task.reminder_sent = true;
        h.store.insert(task);
        assert_eq!(
            h.scheduler.on_fire(1).await,
            FireOutcome::Skipped(SkipReason::AlreadySent)
        );

        let mut task = task_due_in(2, 60);
        task.due_at = None;
        h.store.insert(task);
        assert_eq!(
            h.scheduler.on_fire(2).await,
            FireOutcome::Skipped(SkipReason::NoDueDate)
        );
    }

    #[tokio::test]
    async fn test_stale_timer_after_due_date_move_is_skipped() {
        let h = harness(ReminderConfig::default());
        let task = task_due_in(1, 60);
        h.store.insert(task.clone());
        h.scheduler.arm(&task);

        // Store changes but nobody re-armed: the fired timer notices.
        h.store
            .update(1, |t| t.set_due_at(Some(t0() + Duration::hours(5))));
        h.advance_to(t0() + Duration::minutes(30)).await;

        assert!(h.notifier.sent().is_empty());
        assert!(!h.store.snapshot(1).unwrap().reminder_sent);
    }

    #[tokio::test]
    async fn test_delivery_failure_marks_sent_by_default() {
        let h = harness(ReminderConfig::default());
        h.notifier.fail.store(true, Ordering::SeqCst);
        let task = task_due_in(1, 60);
        h.store.insert(task);

        assert_eq!(
            h.scheduler.on_fire(1).await,
            FireOutcome::DeliveryFailed { marked_sent: true }
        );
        assert!(h.store.snapshot(1).unwrap().reminder_sent);

        // No second attempt for the same due date.
        h.notifier.fail.store(false, Ordering::SeqCst);
        assert_eq!(
            h.scheduler.on_fire(1).await,
            FireOutcome::Skipped(SkipReason::AlreadySent)
        );
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_with_retry_leaves_unsent() {
        let h = harness(ReminderConfig::default().with_retry_on_failure(true));
        h.notifier.fail.store(true, Ordering::SeqCst);
        h.store.insert(task_due_in(1, 60));

        assert_eq!(
            h.scheduler.on_fire(1).await,
            FireOutcome::DeliveryFailed { marked_sent: false }
        );
        assert!(!h.store.snapshot(1).unwrap().reminder_sent);
    }

    #[tokio::test]
    async fn test_second_arm_after_delivery_is_noop() {
        let h = harness(ReminderConfig::default());
        let task = task_due_in(1, 40);
        h.store.insert(task.clone());
        h.scheduler.arm(&task);
        h.advance_to(t0() + Duration::minutes(10)).await;

        let current = h.store.snapshot(1).unwrap();
        assert_eq!(
            h.scheduler.arm(&current),
            ArmOutcome::Skipped(SkipReason::AlreadySent)
        );
        assert_eq!(h.scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn test_on_fire_consumes_pending_job() {
        let h = harness(ReminderConfig::default());
        let task = task_due_in(1, 60);
        h.store.insert(task.clone());
        h.scheduler.arm(&task);

        assert_eq!(h.scheduler.on_fire(1).await, FireOutcome::Delivered);
        assert!(!h.scheduler.is_armed(1));

        // The consumed timer never delivers a second time.
        h.advance_to(t0() + Duration::hours(1)).await;
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_disarm_all() {
        let h = harness(ReminderConfig::default());
        for id in 1..=3 {
            h.scheduler.arm(&task_due_in(id, 60 + id));
        }
        assert_eq!(h.scheduler.jobs().len(), 3);
        assert_eq!(h.scheduler.disarm_all(), 3);
        assert_eq!(h.timer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_arm_unless_newer_respects_mark() {
        let h = harness(ReminderConfig::default());
        let task = task_due_in(1, 60);
        let mark = h.scheduler.generation_mark();
        h.scheduler.arm(&task);

        assert!(h.scheduler.arm_unless_newer(&task, Some(mark)).is_none());
        assert!(!h.scheduler.disarm_older_than(1, mark));
        assert!(h.scheduler.is_armed(1));

        let later = h.scheduler.generation_mark();
        assert!(h.scheduler.disarm_older_than(1, later));
    }

    /// Memory store that applies a due date edit just before the
    /// reminder-sent write lands.
    struct EditDuringDeliveryStore {
        inner: MemoryTaskStore,
        new_due: DateTime<Utc>,
    }

    #[async_trait]
    impl TaskStore for EditDuringDeliveryStore {
        async fn list_eligible(&self) -> Result<Vec<Task>, crate::StoreError> {
            self.inner.list_eligible().await
        }

        async fn get(&self, id: TaskId) -> Result<Option<Task>, crate::StoreError> {
            self.inner.get(id).await
        }

        async fn mark_reminder_sent(
            &self,
            id: TaskId,
            due_at: Option<DateTime<Utc>>,
        ) -> Result<bool, crate::StoreError> {
            self.inner.update(id, |t| t.set_due_at(Some(self.new_due)));
            self.inner.mark_reminder_sent(id, due_at).await
        }
    }

    #[tokio::test]
    async fn test_edit_committed_during_delivery_keeps_new_reminder() {
        let new_due = t0() + Duration::hours(5);
        let store = Arc::new(EditDuringDeliveryStore {
            inner: MemoryTaskStore::new(),
            new_due,
        });
        store.inner.insert(task_due_in(1, 60));
        let timer = Arc::new(ManualTimer::new());
        let scheduler = ReminderScheduler::with_clock(
            ReminderConfig::default(),
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            Arc::new(ManualClock::new(t0())),
            timer.clone(),
        )
        .unwrap();

        assert_eq!(scheduler.on_fire(1).await, FireOutcome::Delivered);

        let current = store.inner.snapshot(1).unwrap();
        assert_eq!(current.due_at, Some(new_due));
        assert!(!current.reminder_sent);
        assert_eq!(
            scheduler.arm(&current),
            ArmOutcome::Armed {
                fire_at: new_due - Duration::minutes(30),
                replaced: false
            }
        );
    }
}
