//! Nudge: due-date reminders for to-do tasks
//!
//! Main binary with subcommands:
//! - `daemon`: Arm reminders and deliver them until interrupted
//! - `add`, `list`, `show`, `update`, `complete`, `delete`: Manage tasks

use clap::{ArgAction, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod due;
mod tasks;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "nudge")]
#[command(about = "Due-date reminders for to-do tasks", long_about = None)]
struct Cli {
    /// Path to the task database
    #[arg(long, global = true, env = "NUDGE_DB", default_value = "nudge.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reminder daemon
    Daemon {
        /// Minutes before the due date to send the reminder
        #[arg(long, env = "NUDGE_REMINDER_OFFSET_MINUTES", default_value = "30")]
        offset_minutes: i64,

        /// Seconds between reconciliation sweeps
        #[arg(long, env = "NUDGE_SWEEP_INTERVAL_SECS", default_value = "300")]
        sweep_interval: u64,

        /// Leave `reminder_sent` unset when delivery fails so the next sweep retries.
        #[arg(long, env = "NUDGE_RETRY_ON_FAILURE", action = ArgAction::Set, value_parser = parse_bool_env, default_value = "false")]
        retry_on_failure: bool,

        /// Let each sweep deliver reminders whose fire time already passed, as
        /// long as the task is not due yet. Tasks added with `nudge add` only
        /// reach the daemon at the next sweep, so with this off a task due
        /// within offset + sweep interval gets no reminder.
        #[arg(long, env = "NUDGE_CATCH_UP", action = ArgAction::Set, value_parser = parse_bool_env, default_value = "true")]
        catch_up: bool,

        /// Post reminders to this URL instead of logging them
        #[arg(long, env = "NUDGE_WEBHOOK_URL")]
        webhook_url: Option<String>,

        /// Bearer token for the webhook
        #[arg(long, env = "NUDGE_WEBHOOK_TOKEN")]
        webhook_token: Option<String>,
    },

    /// Add a task
    Add {
        /// Task title
        title: String,

        /// Owner email address
        #[arg(long)]
        email: String,

        /// Owner name
        #[arg(long)]
        name: String,

        /// Due date (RFC 3339, or `YYYY-MM-DDTHH:MM[:SS]` taken as UTC)
        #[arg(long)]
        due: Option<String>,

        /// Longer description
        #[arg(long)]
        description: Option<String>,
    },

    /// List tasks
    List,

    /// Show one task
    Show {
        /// Task id
        id: i64,
    },

    /// Edit a task
    Update {
        /// Task id
        id: i64,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New description
        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,

        /// Remove the description
        #[arg(long)]
        clear_description: bool,

        /// New due date
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,

        /// Remove the due date
        #[arg(long)]
        clear_due: bool,

        /// Reopen a completed task
        #[arg(long)]
        reopen: bool,
    },

    /// Mark a task completed
    Complete {
        /// Task id
        id: i64,
    },

    /// Delete a task
    Delete {
        /// Task id
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "nudge=info,nudge_scheduler=info,nudge_store=info,nudge_notify=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            offset_minutes,
            sweep_interval,
            retry_on_failure,
            catch_up,
            webhook_url,
            webhook_token,
        } => {
            daemon::run(daemon::DaemonOptions {
                db: cli.db,
                offset_minutes,
                sweep_interval,
                retry_on_failure,
                catch_up,
                webhook_url,
                webhook_token,
            })
            .await
        }

        Commands::Add {
            title,
            email,
            name,
            due,
            description,
        } => tasks::add(&cli.db, title, email, name, due.as_deref(), description),

        Commands::List => tasks::list(&cli.db),

        Commands::Show { id } => tasks::show(&cli.db, id),

        Commands::Update {
            id,
            title,
            description,
            clear_description,
            due,
            clear_due,
            reopen,
        } => {
            let description = if clear_description {
                Some(None)
            } else {
                description.map(Some)
            };
            let due = if clear_due {
                Some(None)
            } else {
                due.as_deref().map(due::parse_due).transpose()?.map(Some)
            };
            tasks::update(&cli.db, id, title, description, due, reopen)
        }

        Commands::Complete { id } => tasks::complete(&cli.db, id),

        Commands::Delete { id } => tasks::delete(&cli.db, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_env() {
        for truthy in ["1", "true", "YES", "On"] {
            assert_eq!(parse_bool_env(truthy), Ok(true));
        }
        for falsy in ["0", "false", "No", "OFF", ""] {
            assert_eq!(parse_bool_env(falsy), Ok(false));
        }
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_cli_parses_daemon_flags() {
        let cli = Cli::try_parse_from([
            "nudge",
            "--db",
            "/tmp/t.db",
            "daemon",
            "--offset-minutes",
            "15",
            "--webhook-url",
            "https://hooks.example.com/remind",
        ])
        .unwrap();

        assert_eq!(cli.db, "/tmp/t.db");
        match cli.command {
            Commands::Daemon {
                offset_minutes,
                webhook_url,
                ..
            } => {
                assert_eq!(offset_minutes, 15);
                assert_eq!(webhook_url.as_deref(), Some("https://hooks.example.com/remind"));
            }
            _ => panic!("expected daemon command"),
        }
    }

    #[test]
    fn test_daemon_catches_up_unless_disabled() {
        let cli = Cli::try_parse_from(["nudge", "daemon"]).unwrap();
        match cli.command {
            Commands::Daemon { catch_up, .. } => assert!(catch_up),
            _ => panic!("expected daemon command"),
        }

        let cli = Cli::try_parse_from(["nudge", "daemon", "--catch-up", "off"]).unwrap();
        match cli.command {
            Commands::Daemon { catch_up, .. } => assert!(!catch_up),
            _ => panic!("expected daemon command"),
        }
    }
}
