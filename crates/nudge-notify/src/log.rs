//! Simulated delivery through the log.

use async_trait::async_trait;
use tracing::info;

use nudge_scheduler::{Notifier, NotifyError};

/// Logs each reminder instead of emailing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!(to = %to, subject = %subject, "sending reminder email");
        info!(body = %body, "reminder body");
        Ok(())
    }
}
