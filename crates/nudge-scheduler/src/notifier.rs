//! Reminder delivery contract.

use async_trait::async_trait;

use crate::NotifyError;

/// Delivers a reminder to a recipient.
///
/// Failures are reported, never retried by the scheduler.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}
