//! Scheduler configuration.

use chrono::Duration;

use crate::SchedulerError;

/// Default lead time between a reminder and the task's due date.
pub const DEFAULT_OFFSET_MINUTES: i64 = 30;

/// Default interval between reconciliation sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Reminder scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderConfig {
    /// How long before the due date the reminder fires.
    pub offset: Duration,
    /// How often the sweeper reconciles jobs with the task store.
    pub sweep_interval: std::time::Duration,
    /// Leave `reminder_sent` unset when delivery fails so a later sweep can
    /// try again. Off by default: a failed reminder is still marked sent.
    pub retry_on_failure: bool,
    /// Let the sweeper deliver reminders whose window already opened
    /// (fire time passed, due date still ahead).
    pub catch_up: bool,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            offset: Duration::minutes(DEFAULT_OFFSET_MINUTES),
            sweep_interval: std::time::Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            retry_on_failure: false,
            catch_up: false,
        }
    }
}

impl ReminderConfig {
    /// Set the reminder offset.
    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the delivery failure policy.
    pub fn with_retry_on_failure(mut self, retry: bool) -> Self {
        self.retry_on_failure = retry;
        self
    }

    /// Enable or disable catch-up delivery in the sweeper.
    pub fn with_catch_up(mut self, catch_up: bool) -> Self {
        self.catch_up = catch_up;
        self
    }

    /// Reject settings the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.offset <= Duration::zero() {
            return Err(SchedulerError::InvalidConfig(format!(
                "reminder offset must be positive, got {}s",
                self.offset.num_seconds()
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "sweep interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
