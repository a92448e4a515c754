use std::time::Duration as PollInterval;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cli::{Command, NotifyAction};
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{normalize_clock_time, parse_due_date, project_today};
use crate::notify::{DesktopNotifier, Note, Notifier, Permission, SystemClock};
use crate::recurrence::{self, Frequency, RecurrenceRule};
use crate::render::Renderer;
use crate::scheduler::{DEFAULT_POLL_INTERVAL_SECS, Scheduler, scan_due_buckets};
use crate::settings::SettingsStore;
use crate::task::{self, BoardStatus, Task, TaskList};

#[instrument(skip(store, cfg, renderer, command))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(?command, "dispatching command");

    match command {
        Command::Add {
            text,
            list,
            parent,
            due,
            priority,
            tags,
            notes,
            header,
            freq,
            every,
            on_days,
            day_of_month,
            until,
        } => cmd_add(
            store,
            cfg,
            AddArgs {
                text: text.join(" "),
                list,
                parent,
                due,
                priority,
                tags,
                notes,
                header,
                freq,
                every,
                on_days,
                day_of_month,
                until,
            },
        ),
        Command::List { list } => cmd_list(store, renderer, list.as_deref(), now),
        Command::Info { id } => cmd_info(store, renderer, &id),
        Command::Done { id } => cmd_done(store, &id, now),
        Command::Remove { id } => cmd_remove(store, &id),
        Command::Agenda => cmd_agenda(store, renderer, now),
        Command::Notify { action } => cmd_notify(store, action),
        Command::Watch => cmd_watch(store, cfg),
        Command::Version => cmd_version(),
    }
}

fn cmd_version() -> anyhow::Result<()> {
    println!("twig {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

struct AddArgs {
    text: String,
    list: Option<String>,
    parent: Option<String>,
    due: Option<String>,
    priority: Option<crate::task::Priority>,
    tags: Vec<String>,
    notes: Option<String>,
    header: bool,
    freq: Option<Frequency>,
    every: u32,
    on_days: Option<String>,
    day_of_month: Option<u32>,
    until: Option<String>,
}

#[instrument(skip(store, cfg, args))]
fn cmd_add(store: &DataStore, cfg: &Config, args: AddArgs) -> anyhow::Result<()> {
    info!("command add");

    let mut lists = store.load_lists()?;

    let mut new_task = Task::new(args.text, 0);
    new_task.is_header = args.header;
    new_task.priority = args.priority;
    new_task.tags = args.tags;
    new_task.notes = args.notes;
    if let Some(raw) = args.due.as_deref() {
        new_task.due_date = Some(parse_due_date(raw)?);
    }

    if let Some(frequency) = args.freq {
        if args.header {
            return Err(anyhow!("section headers cannot recur"));
        }
        new_task.recurrence = Some(build_rule(
            frequency,
            args.every,
            args.on_days.as_deref(),
            args.day_of_month,
            args.until.as_deref(),
        )?);
        new_task.is_recurring = true;
    }

    let short = short_id(&new_task);

    if let Some(parent_ref) = args.parent.as_deref() {
        let parent_id = resolve_task_id(&lists, parent_ref)?;
        let parent = lists
            .iter_mut()
            .find_map(|l| task::find_mut(&mut l.tasks, parent_id))
            .ok_or_else(|| anyhow!("parent task not found: {parent_id}"))?;
        new_task.level = parent.level + 1;
        parent.children.push(new_task);
    } else {
        let list_id = args
            .list
            .or_else(|| cfg.get("default.list"))
            .unwrap_or_else(|| "inbox".to_string());
        let list = find_or_create_list(&mut lists, &list_id);
        list.tasks.push(new_task);
    }

    store.save_lists(&lists)?;
    println!("Created task {short}.");
    Ok(())
}

fn build_rule(
    frequency: Frequency,
    every: u32,
    on_days: Option<&str>,
    day_of_month: Option<u32>,
    until: Option<&str>,
) -> anyhow::Result<RecurrenceRule> {
    if every == 0 {
        return Err(anyhow!("--every must be at least 1"));
    }

    let mut rule = RecurrenceRule::every(frequency, every);

    if let Some(raw) = on_days {
        if rule.frequency != Frequency::Weekly {
            warn!(frequency = ?rule.frequency, "--on-days only applies to weekly recurrence; ignoring");
        } else {
            for token in raw.split(',') {
                let day = recurrence::parse_weekday_token(token)
                    .ok_or_else(|| anyhow!("unknown weekday: {token}"))?;
                if !rule.days_of_week.contains(&day) {
                    rule.days_of_week.push(day);
                }
            }
        }
    }

    if let Some(day) = day_of_month {
        if rule.frequency != Frequency::Monthly {
            warn!(frequency = ?rule.frequency, "--day-of-month only applies to monthly recurrence; ignoring");
        } else if !(1..=31).contains(&day) {
            return Err(anyhow!("--day-of-month must be within 1-31, got {day}"));
        } else {
            rule.day_of_month = Some(day);
        }
    }

    if let Some(raw) = until {
        rule.end_date = Some(parse_due_date(raw)?);
    }

    Ok(rule)
}

#[instrument(skip(store, renderer, now))]
fn cmd_list(
    store: &DataStore,
    renderer: &mut Renderer,
    only: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");

    let mut lists = store.load_lists()?;
    if let Some(wanted) = only {
        let wanted = wanted.to_ascii_lowercase();
        lists.retain(|l| {
            l.id.to_ascii_lowercase() == wanted || l.name.to_ascii_lowercase() == wanted
        });
        if lists.is_empty() {
            return Err(anyhow!("no such list: {wanted}"));
        }
    }

    renderer.print_tree_table(&lists, project_today(now))?;

    let mut total = 0;
    let mut completed = 0;
    for list in &lists {
        let (t, c) = task::count_actionable(&list.tasks);
        total += t;
        completed += c;
    }
    println!("{completed}/{total} tasks completed.");
    Ok(())
}

#[instrument(skip(store, renderer))]
fn cmd_info(store: &DataStore, renderer: &mut Renderer, id_ref: &str) -> anyhow::Result<()> {
    info!("command info");

    let lists = store.load_lists()?;
    let id = resolve_task_id(&lists, id_ref)?;
    let found = lists
        .iter()
        .find_map(|l| task::find(&l.tasks, id))
        .ok_or_else(|| anyhow!("task not found: {id}"))?;
    renderer.print_task_info(found)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed,
    Rescheduled(NaiveDate),
}

/// Applies a completion event to the tree. Recurring tasks are
/// stamped with their next due date and stay pending; a recurrence
/// that has concluded (or a plain task) is marked completed. A
/// malformed rule is logged and degrades to a next-day reschedule so
/// completing a task never fails.
pub fn complete_task(
    lists: &mut [TaskList],
    id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<CompletionOutcome> {
    let task = lists
        .iter_mut()
        .find_map(|l| task::find_mut(&mut l.tasks, id))
        .ok_or_else(|| anyhow!("task not found: {id}"))?;

    if task.is_header {
        return Err(anyhow!("section headers cannot be completed"));
    }

    let today = project_today(now);

    if task.is_recurring {
        if let Some(rule) = task.recurrence.clone() {
            let next = match recurrence::next_due_date(&rule, today) {
                Ok(next) => next,
                Err(err) => {
                    warn!(
                        task = %task.id,
                        rule = ?rule,
                        error = %err,
                        "malformed recurrence rule; rescheduling for the next day"
                    );
                    Some(today.succ_opt().ok_or_else(|| anyhow!("date overflow"))?)
                }
            };

            if let Some(next) = next {
                task.due_date = Some(next);
                task.completed = false;
                task.completed_at = None;
                return Ok(CompletionOutcome::Rescheduled(next));
            }
            debug!(task = %task.id, "recurrence concluded; completing task");
        }
    }

    task.completed = true;
    task.completed_at = Some(now);
    if task.status.is_some() {
        task.status = Some(BoardStatus::Done);
    }
    Ok(CompletionOutcome::Completed)
}

#[instrument(skip(store, now))]
fn cmd_done(store: &DataStore, id_ref: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command done");

    let mut lists = store.load_lists()?;
    let id = resolve_task_id(&lists, id_ref)?;
    let outcome = complete_task(&mut lists, id, now)?;
    store.save_lists(&lists)?;

    // Reminder ids with no matching task (stale after external edits
    // to the tasks file) are dropped on the way out.
    let alive = alive_ids(&lists);
    SettingsStore::new(store).prune_notified(&alive);

    match outcome {
        CompletionOutcome::Rescheduled(next) => {
            println!("Task rescheduled for {next}.");
        }
        CompletionOutcome::Completed => {
            println!("Completed task.");
        }
    }
    Ok(())
}

#[instrument(skip(store))]
fn cmd_remove(store: &DataStore, id_ref: &str) -> anyhow::Result<()> {
    info!("command remove");

    let mut lists = store.load_lists()?;
    let id = resolve_task_id(&lists, id_ref)?;

    let removed = lists
        .iter_mut()
        .find_map(|l| task::remove(&mut l.tasks, id))
        .ok_or_else(|| anyhow!("task not found: {id}"))?;
    let removed_count = task::collect_ids(&removed).len();

    store.save_lists(&lists)?;

    // Reminder bookkeeping for deleted tasks goes with them.
    let alive = alive_ids(&lists);
    SettingsStore::new(store).prune_notified(&alive);

    println!("Removed {removed_count} task(s).");
    Ok(())
}

#[instrument(skip(store, renderer, now))]
fn cmd_agenda(store: &DataStore, renderer: &mut Renderer, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command agenda");

    let lists = store.load_lists()?;
    let buckets = scan_due_buckets(&lists, project_today(now));
    renderer.print_agenda(&buckets)
}

#[instrument(skip(store, action))]
fn cmd_notify(store: &DataStore, action: NotifyAction) -> anyhow::Result<()> {
    info!("command notify");
    let settings = SettingsStore::new(store);

    match action {
        NotifyAction::Show => {
            let current = settings.current();
            println!("{}", serde_json::to_string_pretty(&current)?);
        }
        NotifyAction::Enable => {
            settings.update(|s| s.enabled = true);
            println!("Notifications enabled.");
        }
        NotifyAction::Disable => {
            settings.update(|s| s.enabled = false);
            println!("Notifications disabled.");
        }
        NotifyAction::Daily { time } => {
            let normalized = normalize_clock_time(&time)?;
            settings.update(|s| {
                s.daily_reminder_enabled = true;
                s.daily_reminder_time = normalized.clone();
            });
            println!("Daily summary scheduled for {normalized}.");
        }
        NotifyAction::BeforeDue { minutes } => {
            if minutes == 0 {
                return Err(anyhow!("before-due window must be at least 1 minute"));
            }
            settings.update(|s| {
                s.before_due_enabled = true;
                s.before_due_minutes = minutes;
            });
            println!("Before-due reminders set to {minutes} minute(s).");
        }
        NotifyAction::Test => {
            let mut notifier = DesktopNotifier::new();
            let permission = notifier.request_permission()?;
            if permission != Permission::Granted {
                return Err(anyhow!("notification backend unavailable: {permission:?}"));
            }
            notifier
                .send(&Note {
                    title: "Twig".to_string(),
                    body: "Test notification.".to_string(),
                    tag: "test".to_string(),
                })
                .context("test notification failed")?;
            println!("Test notification sent.");
        }
    }

    Ok(())
}

#[instrument(skip(store, cfg))]
fn cmd_watch(store: &DataStore, cfg: &Config) -> anyhow::Result<()> {
    info!("command watch");

    let settings = SettingsStore::new(store);
    if !settings.current().enabled {
        println!("Notifications are disabled; run `twig notify enable` first.");
        return Ok(());
    }

    let mut scheduler = Scheduler::new(SystemClock, DesktopNotifier::new());
    let permission = scheduler.request_permission(&settings)?;
    if permission != Permission::Granted {
        println!("Notification backend unavailable ({permission:?}); not watching.");
        return Ok(());
    }

    let interval_secs = cfg
        .get_u64("poll.interval")
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    println!("Watching for reminders every {interval_secs}s. Press Ctrl-C to stop.");
    scheduler.run(store, PollInterval::from_secs(interval_secs))
}

fn find_or_create_list<'a>(lists: &'a mut Vec<TaskList>, id: &str) -> &'a mut TaskList {
    if let Some(idx) = lists.iter().position(|l| l.id == id) {
        return &mut lists[idx];
    }
    lists.push(TaskList::new(id.to_string(), id.to_string()));
    let last = lists.len() - 1;
    &mut lists[last]
}

fn resolve_task_id(lists: &[TaskList], needle: &str) -> anyhow::Result<Uuid> {
    let needle = needle.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return Err(anyhow!("empty task id"));
    }

    let mut matches = Vec::new();
    for list in lists {
        list.walk(&mut |t| {
            if t.id.to_string().starts_with(&needle) {
                matches.push(t.id);
            }
        });
    }

    match matches.len() {
        0 => Err(anyhow!("no task matching id: {needle}")),
        1 => Ok(matches[0]),
        n => Err(anyhow!("ambiguous task id {needle}: {n} matches")),
    }
}

fn alive_ids(lists: &[TaskList]) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for list in lists {
        list.walk(&mut |t| ids.push(t.id));
    }
    ids
}

fn short_id(task: &Task) -> String {
    task.id.to_string().chars().take(8).collect()
}
