//! Daemon command: arm reminders from the database and deliver them.

use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tokio::sync::watch;
use tracing::{error, info};

use nudge_notify::{LogNotifier, WebhookNotifier};
use nudge_scheduler::{Lifecycle, Notifier, ReminderConfig, ReminderScheduler};
use nudge_store::SqliteTaskStore;

/// Settings for the daemon, from flags or environment.
pub struct DaemonOptions {
    pub db: String,
    pub offset_minutes: i64,
    pub sweep_interval: u64,
    pub retry_on_failure: bool,
    pub catch_up: bool,
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
}

impl DaemonOptions {
    fn reminder_config(&self) -> ReminderConfig {
        ReminderConfig::default()
            .with_offset(chrono::Duration::minutes(self.offset_minutes))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval))
            .with_retry_on_failure(self.retry_on_failure)
            .with_catch_up(self.catch_up)
    }

    fn notifier(&self) -> Result<Arc<dyn Notifier>> {
        match &self.webhook_url {
            Some(url) => {
                let notifier = WebhookNotifier::new(url, self.webhook_token.clone())
                    .map_err(|e| miette::miette!("{}", e))?;
                info!(url = %notifier.url(), "delivering reminders by webhook");
                Ok(Arc::new(notifier))
            }
            None => {
                info!("no webhook configured, reminders will be logged");
                Ok(Arc::new(LogNotifier::new()))
            }
        }
    }
}

/// Run the daemon until Ctrl-C.
pub async fn run(options: DaemonOptions) -> Result<()> {
    let store = SqliteTaskStore::open(&options.db)
        .map_err(|e| miette::miette!("failed to open database {}: {}", options.db, e))?;
    let notifier = options.notifier()?;

    let scheduler = ReminderScheduler::new(options.reminder_config(), Arc::new(store), notifier)
        .map_err(|e| miette::miette!("{}", e))?;
    let lifecycle = Lifecycle::new(scheduler);

    // A failed initial load is not fatal; the sweeper retries it.
    if let Err(e) = lifecycle.start().await {
        error!(error = %e, "failed to load tasks at startup");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    let sweeper = {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move { lifecycle.run_sweeper(shutdown_rx).await })
    };

    info!(db = %options.db, "nudge daemon running");

    if let Err(e) = sweeper.await {
        error!(error = %e, "sweeper task panicked");
    }

    lifecycle.shutdown();
    drop(shutdown_tx);
    info!("nudge daemon stopped");
    Ok(())
}
