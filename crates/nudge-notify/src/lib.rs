//! Reminder delivery backends.
//!
//! - [`LogNotifier`]: writes the reminder to the log instead of sending it
//! - [`WebhookNotifier`]: posts the reminder as JSON to an HTTP endpoint

mod log;
mod webhook;

pub use log::LogNotifier;
pub use webhook::{WebhookNotifier, WebhookPayload};
