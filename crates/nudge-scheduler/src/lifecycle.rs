//! Lifecycle controller: startup reload, task change hooks, and the sweeper.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    ArmOutcome, FireOutcome, ReminderScheduler, SchedulerError, SkipReason, Task, TaskId,
    TaskStore,
};

/// Summary of [`Lifecycle::start`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartReport {
    /// Tasks listed by the store.
    pub loaded: usize,
    /// Tasks that got a pending reminder.
    pub armed: usize,
    /// Tasks that were not eligible.
    pub skipped: usize,
}

/// Summary of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs created or replaced.
    pub armed: usize,
    /// Jobs already matching the store.
    pub unchanged: usize,
    /// Jobs cancelled because their task is gone or no longer eligible.
    pub disarmed: usize,
    /// Reminders delivered by catch-up.
    pub caught_up: usize,
}

/// Connects task changes in the application to the reminder scheduler.
///
/// The task store is the source of truth; the job table is rebuilt from it
/// by [`Lifecycle::start`] and kept honest by [`Lifecycle::reconcile`].
#[derive(Clone)]
pub struct Lifecycle {
    scheduler: ReminderScheduler,
}

impl Lifecycle {
    pub fn new(scheduler: ReminderScheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.scheduler
    }

    fn store(&self) -> &Arc<dyn TaskStore> {
        self.scheduler.store()
    }

    /// Load every open, unsent task and arm its reminder.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<StartReport, SchedulerError> {
        let tasks = self.store().list_eligible().await?;
        let mut report = StartReport {
            loaded: tasks.len(),
            ..Default::default()
        };

        for task in &tasks {
            match self.scheduler.arm(task) {
                ArmOutcome::Armed { .. } => report.armed += 1,
                ArmOutcome::Skipped(reason) => {
                    debug!(task_id = task.id, reason = %reason, "not arming task at startup");
                    report.skipped += 1;
                }
            }
        }

        info!(
            loaded = report.loaded,
            armed = report.armed,
            skipped = report.skipped,
            "reminder scheduler started"
        );
        Ok(report)
    }

    /// A task was created.
    pub fn on_task_created(&self, task: &Task) -> ArmOutcome {
        self.rearm(task)
    }

    /// A task was edited: due date, completion, or anything else.
    pub fn on_task_updated(&self, task: &Task) -> ArmOutcome {
        self.rearm(task)
    }

    /// A task was deleted.
    pub fn on_task_deleted(&self, task_id: TaskId) {
        self.scheduler.disarm(task_id);
    }

    fn rearm(&self, task: &Task) -> ArmOutcome {
        self.scheduler.disarm(task.id);
        self.scheduler.arm(task)
    }

    /// Bring the job table in line with the task store.
    ///
    /// Eligible tasks without a matching job are armed, jobs for tasks that
    /// dropped out of the eligible set are cancelled. Jobs armed by the
    /// request path while the sweep runs are left alone.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<SweepReport, SchedulerError> {
        let mark = self.scheduler.generation_mark();
        let tasks = self.store().list_eligible().await?;
        let offset = self.scheduler.config().offset;
        let mut report = SweepReport::default();
        let mut catch_up = Vec::new();
        let mut seen = HashSet::with_capacity(tasks.len());

        for task in &tasks {
            seen.insert(task.id);

            if let Some(job) = self.scheduler.job(task.id) {
                if Some(job.fire_at) == task.fire_at(offset) {
                    report.unchanged += 1;
                    continue;
                }
            }

            match self.scheduler.arm_unless_newer(task, Some(mark)) {
                Some(ArmOutcome::Armed { .. }) => report.armed += 1,
                Some(ArmOutcome::Skipped(reason)) => {
                    if self.scheduler.disarm_older_than(task.id, mark) {
                        report.disarmed += 1;
                    }
                    if reason == SkipReason::WindowElapsed && self.in_open_window(task) {
                        catch_up.push(task.id);
                    }
                }
                None => report.unchanged += 1,
            }
        }

        for job in self.scheduler.jobs() {
            if !seen.contains(&job.task_id) && self.scheduler.disarm_older_than(job.task_id, mark) {
                report.disarmed += 1;
            }
        }

        if self.scheduler.config().catch_up {
            for task_id in catch_up {
                match self.scheduler.on_fire(task_id).await {
                    FireOutcome::Delivered | FireOutcome::DeliveryFailed { .. } => {
                        report.caught_up += 1;
                    }
                    outcome => debug!(task_id, ?outcome, "catch-up skipped"),
                }
            }
        }

        Ok(report)
    }

    /// Fire time passed but the task is not due yet.
    fn in_open_window(&self, task: &Task) -> bool {
        let now = self.scheduler.clock().now();
        task.due_at.is_some_and(|due| due > now)
    }

    /// Run reconciliation sweeps until shutdown is signalled.
    pub async fn run_sweeper(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let interval = self.scheduler.config().sweep_interval;
        info!(interval_secs = interval.as_secs(), "reminder sweeper starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped; nobody can stop us any more.
                        warn!("shutdown channel closed, stopping sweeper");
                        break;
                    }
                    continue;
                }
                _ = sleep(interval) => {}
            }

            match self.reconcile().await {
                Ok(report) => {
                    if report.armed + report.disarmed + report.caught_up > 0 {
                        info!(
                            armed = report.armed,
                            disarmed = report.disarmed,
                            caught_up = report.caught_up,
                            "reminder sweep reconciled jobs"
                        );
                    } else {
                        debug!(unchanged = report.unchanged, "reminder sweep found nothing to do");
                    }
                }
                Err(e) => error!(error = %e, "reminder sweep failed"),
            }
        }

        info!("reminder sweeper stopped");
    }

    /// Cancel every pending reminder.
    pub fn shutdown(&self) {
        let count = self.scheduler.disarm_all();
        info!(count, "reminder scheduler shut down");
    }
}
