use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::recurrence::Frequency;
use crate::task::Priority;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "twig",
    version,
    about = "Twig: hierarchical to-do lists with recurring tasks and reminders",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(long = "twigrc", global = true)]
    pub twigrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a task (optionally recurring) to a list
    Add {
        #[arg(required = true)]
        text: Vec<String>,

        /// Target list id (defaults to the configured default list)
        #[arg(long)]
        list: Option<String>,

        /// Parent task id (prefix match); the task becomes a child
        #[arg(long)]
        parent: Option<String>,

        /// Due date, YYYY-MM-DD
        #[arg(long)]
        due: Option<String>,

        #[arg(long, value_enum)]
        priority: Option<Priority>,

        #[arg(long = "tag", action = ArgAction::Append)]
        tags: Vec<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Mark as a non-actionable section header
        #[arg(long)]
        header: bool,

        /// Recurrence frequency; makes the task recurring
        #[arg(long, value_enum)]
        freq: Option<Frequency>,

        /// Recurrence interval ("every N units")
        #[arg(long, default_value_t = 1)]
        every: u32,

        /// Weekdays for weekly recurrence, e.g. "mon,wed,fri"
        #[arg(long)]
        on_days: Option<String>,

        /// Day of month for monthly recurrence (1-31, clamped)
        #[arg(long)]
        day_of_month: Option<u32>,

        /// Recurrence end date (inclusive cutoff), YYYY-MM-DD
        #[arg(long)]
        until: Option<String>,
    },

    /// Show task trees
    List {
        /// Restrict to one list id
        #[arg(long)]
        list: Option<String>,
    },

    /// Show one task in full, including its recurrence schedule
    Info { id: String },

    /// Complete a task; recurring tasks are rescheduled instead
    Done { id: String },

    /// Delete a task subtree
    Remove { id: String },

    /// Show overdue / due today / due tomorrow buckets
    Agenda,

    /// Manage notification settings
    Notify {
        #[command(subcommand)]
        action: NotifyAction,
    },

    /// Run the notification scheduler in the foreground
    Watch,

    /// Print the version
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum NotifyAction {
    /// Print the current settings record
    Show,
    Enable,
    Disable,
    /// Set the daily summary time (HH:MM, am/pm accepted)
    Daily { time: String },
    /// Set the advance reminder window in minutes
    BeforeDue { minutes: u32 },
    /// Send a test notification through the desktop backend
    Test,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Strips `rc.key=value` tokens anywhere on the command line before
/// clap sees them; they become config overrides.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
