use std::thread;
use std::time::Duration as PollInterval;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, instrument, warn};

use crate::datastore::DataStore;
use crate::datetime::{clock_minute, due_midnight_utc, minute_key, project_today};
use crate::notify::{Clock, Note, Notifier, Permission};
use crate::settings::{NotificationSettings, SettingsStore};
use crate::task::{Task, TaskList};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Disabled,
    AwaitingPermission,
    Active,
}

pub fn scheduler_state(settings: &NotificationSettings, permission: Permission) -> SchedulerState {
    if !settings.enabled || permission == Permission::Unsupported {
        SchedulerState::Disabled
    } else if permission == Permission::Granted {
        SchedulerState::Active
    } else {
        SchedulerState::AwaitingPermission
    }
}

/// Non-completed, non-header tasks bucketed by due date relative to
/// "today" in the project timezone.
#[derive(Debug, Default)]
pub struct DueBuckets<'a> {
    pub overdue: Vec<&'a Task>,
    pub due_today: Vec<&'a Task>,
    pub due_tomorrow: Vec<&'a Task>,
}

impl<'a> DueBuckets<'a> {
    pub fn total(&self) -> usize {
        self.overdue.len() + self.due_today.len() + self.due_tomorrow.len()
    }

    fn single(&self) -> Option<(&'a Task, &'static str)> {
        if self.total() != 1 {
            return None;
        }
        self.overdue
            .first()
            .map(|t| (*t, "overdue"))
            .or_else(|| self.due_today.first().map(|t| (*t, "due today")))
            .or_else(|| self.due_tomorrow.first().map(|t| (*t, "due tomorrow")))
    }
}

pub fn scan_due_buckets<'a>(lists: &'a [TaskList], today: NaiveDate) -> DueBuckets<'a> {
    let tomorrow = today.succ_opt();
    let mut buckets = DueBuckets::default();

    for list in lists {
        list.walk(&mut |task| {
            if task.is_header || task.completed {
                return;
            }
            let Some(due) = task.due_date else {
                return;
            };
            if due < today {
                buckets.overdue.push(task);
            } else if due == today {
                buckets.due_today.push(task);
            } else if Some(due) == tomorrow {
                buckets.due_tomorrow.push(task);
            }
        });
    }

    buckets
}

fn summary_note(buckets: &DueBuckets) -> Note {
    if let Some((task, label)) = buckets.single() {
        return Note {
            title: "Task reminder".to_string(),
            body: format!("\"{}\" is {label}.", task.text),
            tag: "daily-summary".to_string(),
        };
    }

    let mut parts = Vec::new();
    if !buckets.overdue.is_empty() {
        parts.push(format!("{} overdue", buckets.overdue.len()));
    }
    if !buckets.due_today.is_empty() {
        parts.push(format!("{} due today", buckets.due_today.len()));
    }
    if !buckets.due_tomorrow.is_empty() {
        parts.push(format!("{} due tomorrow", buckets.due_tomorrow.len()));
    }

    Note {
        title: "Daily task summary".to_string(),
        body: parts.join(", "),
        tag: "daily-summary".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub state: SchedulerState,
    /// False when the minute guard suppressed a duplicate check.
    pub ran: bool,
    pub daily_sent: bool,
    pub reminders_sent: usize,
}

impl TickOutcome {
    fn idle(state: SchedulerState, ran: bool) -> Self {
        Self {
            state,
            ran,
            daily_sent: false,
            reminders_sent: 0,
        }
    }
}

pub struct Scheduler<C: Clock, N: Notifier> {
    clock: C,
    notifier: N,
    last_checked_minute: Option<String>,
}

impl<C: Clock, N: Notifier> Scheduler<C, N> {
    pub fn new(clock: C, notifier: N) -> Self {
        Self {
            clock,
            notifier,
            last_checked_minute: None,
        }
    }

    /// Sole entry point that may prompt the platform; mirrors the
    /// result into the persisted settings record.
    #[instrument(skip_all)]
    pub fn request_permission(&mut self, settings: &SettingsStore) -> anyhow::Result<Permission> {
        let permission = self.notifier.request_permission()?;
        settings.update(|s| s.permission_granted = permission == Permission::Granted);
        info!(?permission, "notification permission resolved");
        Ok(permission)
    }

    /// One poll: daily summary first, then before-due reminders, in
    /// that order. Idempotent per wall-clock minute. Never errors;
    /// send failures are logged and leave the guards unset so the
    /// next poll can retry.
    #[instrument(skip_all)]
    pub fn tick(&mut self, lists: &[TaskList], settings_store: &SettingsStore) -> TickOutcome {
        let settings = settings_store.current();
        let state = scheduler_state(&settings, self.notifier.permission());
        if state != SchedulerState::Active {
            debug!(?state, "scheduler not active; skipping check");
            return TickOutcome::idle(state, false);
        }

        let now = self.clock.now();
        let minute = minute_key(now);
        if self.last_checked_minute.as_deref() == Some(minute.as_str()) {
            debug!(minute = %minute, "minute already checked; skipping");
            return TickOutcome::idle(state, false);
        }
        self.last_checked_minute = Some(minute);

        let today = project_today(now);
        let mut outcome = TickOutcome::idle(state, true);

        if settings.daily_reminder_enabled
            && clock_minute(now) == settings.daily_reminder_time
            && settings.last_daily_notification != Some(today)
        {
            outcome.daily_sent = self.send_daily_summary(lists, today, settings_store);
        }

        if settings.before_due_enabled {
            outcome.reminders_sent =
                self.send_before_due_reminders(lists, &settings, now, settings_store);
        }

        outcome
    }

    fn send_daily_summary(
        &self,
        lists: &[TaskList],
        today: NaiveDate,
        settings_store: &SettingsStore,
    ) -> bool {
        let buckets = scan_due_buckets(lists, today);
        if buckets.total() == 0 {
            // Nothing to report; the date guard stays unset so tasks
            // appearing later today can still trigger a summary.
            debug!("no tasks qualify for daily summary");
            return false;
        }

        let note = summary_note(&buckets);
        match self.notifier.send(&note) {
            Ok(()) => {
                settings_store.mark_daily_sent(today);
                info!(
                    overdue = buckets.overdue.len(),
                    due_today = buckets.due_today.len(),
                    due_tomorrow = buckets.due_tomorrow.len(),
                    "sent daily summary"
                );
                true
            }
            Err(err) => {
                warn!(error = %err, "daily summary send failed; will retry");
                false
            }
        }
    }

    fn send_before_due_reminders(
        &self,
        lists: &[TaskList],
        settings: &NotificationSettings,
        now: chrono::DateTime<chrono::Utc>,
        settings_store: &SettingsStore,
    ) -> usize {
        let window = Duration::minutes(i64::from(settings.before_due_minutes));

        let mut candidates = Vec::new();
        for list in lists {
            list.walk(&mut |task| {
                if task.is_header || task.completed || settings.has_notified(task.id) {
                    return;
                }
                if let Some(due) = task.due_date {
                    candidates.push((task, due));
                }
            });
        }

        let mut sent = 0;
        for (task, due) in candidates {
            let midnight = match due_midnight_utc(due) {
                Ok(midnight) => midnight,
                Err(err) => {
                    warn!(task = %task.id, error = %err, "cannot resolve due midnight");
                    continue;
                }
            };

            let until = midnight - now;
            if until <= Duration::zero() || until > window {
                continue;
            }

            let note = Note {
                title: "Upcoming task".to_string(),
                body: format!("\"{}\" is due in {} minute(s).", task.text, until.num_minutes()),
                tag: format!("due-{}", task.id),
            };

            match self.notifier.send(&note) {
                Ok(()) => {
                    settings_store.mark_task_notified(task.id);
                    info!(task = %task.id, minutes = until.num_minutes(), "sent before-due reminder");
                    sent += 1;
                }
                Err(err) => {
                    // Not marked as notified, so the next poll retries.
                    warn!(task = %task.id, error = %err, "before-due send failed");
                }
            }
        }

        sent
    }

    /// Polling loop: re-reads the task trees and settings fresh each
    /// iteration and exits deterministically as soon as the scheduler
    /// leaves the active state.
    #[instrument(skip_all, fields(interval_secs = interval.as_secs()))]
    pub fn run(&mut self, store: &DataStore, interval: PollInterval) -> anyhow::Result<()> {
        let settings_store = SettingsStore::new(store);
        loop {
            let lists = store.load_lists()?;
            let outcome = self.tick(&lists, &settings_store);
            if outcome.state != SchedulerState::Active {
                info!(state = ?outcome.state, "scheduler no longer active; stopping");
                return Ok(());
            }
            thread::sleep(interval);
        }
    }
}
