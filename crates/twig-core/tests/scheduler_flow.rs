use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tempfile::tempdir;
use twig_core::datastore::DataStore;
use twig_core::notify::{Clock, Note, Notifier, Permission};
use twig_core::scheduler::{Scheduler, SchedulerState};
use twig_core::settings::SettingsStore;
use twig_core::task::{Task, TaskList};

#[derive(Clone)]
struct TestClock(Rc<Cell<DateTime<Utc>>>);

impl TestClock {
    fn at(now: DateTime<Utc>) -> Self {
        Self(Rc::new(Cell::new(now)))
    }

    fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        self.0.get()
    }
}

#[derive(Clone)]
struct RecordingNotifier {
    permission: Rc<Cell<Permission>>,
    fail_sends: Rc<Cell<bool>>,
    sent: Rc<RefCell<Vec<Note>>>,
}

impl RecordingNotifier {
    fn granted() -> Self {
        Self {
            permission: Rc::new(Cell::new(Permission::Granted)),
            fail_sends: Rc::new(Cell::new(false)),
            sent: Rc::new(RefCell::new(vec![])),
        }
    }

    fn sent_tags(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|n| n.tag.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn permission(&self) -> Permission {
        self.permission.get()
    }

    fn request_permission(&mut self) -> anyhow::Result<Permission> {
        Ok(self.permission.get())
    }

    fn send(&self, note: &Note) -> anyhow::Result<()> {
        if self.fail_sends.get() {
            return Err(anyhow!("backend refused"));
        }
        self.sent.borrow_mut().push(note.clone());
        Ok(())
    }
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
        .single()
        .expect("valid datetime")
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn due_task(text: &str, due: NaiveDate) -> Task {
    let mut task = Task::new(text.to_string(), 0);
    task.due_date = Some(due);
    task
}

fn single_list(tasks: Vec<Task>) -> Vec<TaskList> {
    let mut list = TaskList::new("inbox".to_string(), "Inbox".to_string());
    list.tasks = tasks;
    vec![list]
}

fn enabled_store(store: &DataStore) -> SettingsStore<'_> {
    let settings = SettingsStore::new(store);
    settings.update(|s| {
        s.enabled = true;
        s.permission_granted = true;
    });
    settings
}

// Scenario: a task due exactly within the before-due window fires one
// reminder, is recorded, and a poll one minute later stays quiet.
#[test]
fn before_due_reminder_fires_exactly_once() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let settings = enabled_store(&store);
    settings.update(|s| s.daily_reminder_enabled = false);

    let task = due_task("Submit report", date(2024, 1, 16));
    let task_id = task.id;
    let lists = single_list(vec![task]);

    // 23:30 UTC, 30 minutes before the due date's midnight.
    let clock = TestClock::at(utc(2024, 1, 15, 23, 30, 0));
    let notifier = RecordingNotifier::granted();
    let mut scheduler = Scheduler::new(clock.clone(), notifier.clone());

    let outcome = scheduler.tick(&lists, &settings);
    assert_eq!(outcome.state, SchedulerState::Active);
    assert!(outcome.ran);
    assert_eq!(outcome.reminders_sent, 1);
    assert_eq!(notifier.sent_tags(), vec![format!("due-{task_id}")]);
    assert!(settings.current().has_notified(task_id));

    clock.advance(Duration::minutes(1));
    let outcome = scheduler.tick(&lists, &settings);
    assert!(outcome.ran);
    assert_eq!(outcome.reminders_sent, 0);
    assert_eq!(notifier.sent.borrow().len(), 1);
}

#[test]
fn before_due_ignores_headers_completed_and_far_future() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let settings = enabled_store(&store);
    settings.update(|s| s.daily_reminder_enabled = false);

    let mut header = due_task("Section", date(2024, 1, 16));
    header.is_header = true;
    let mut finished = due_task("Already done", date(2024, 1, 16));
    finished.completed = true;
    // Midnight of the 17th is 24.5h out, far past the 60min window.
    let distant = due_task("Distant", date(2024, 1, 17));
    // Midnight of the 15th has already passed.
    let past = due_task("Past", date(2024, 1, 15));

    let lists = single_list(vec![header, finished, distant, past]);

    let clock = TestClock::at(utc(2024, 1, 15, 23, 30, 0));
    let notifier = RecordingNotifier::granted();
    let mut scheduler = Scheduler::new(clock, notifier.clone());

    let outcome = scheduler.tick(&lists, &settings);
    assert_eq!(outcome.reminders_sent, 0);
    assert!(notifier.sent.borrow().is_empty());
}

// Scenario: the daily summary with zero qualifying tasks sends
// nothing and leaves the date guard unset, so a run later that day
// (after a restart, with tasks present) may still fire once.
#[test]
fn empty_daily_summary_does_not_consume_the_day() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let settings = enabled_store(&store);

    let clock = TestClock::at(utc(2024, 1, 15, 9, 0, 10));
    let notifier = RecordingNotifier::granted();
    let mut scheduler = Scheduler::new(clock.clone(), notifier.clone());

    let outcome = scheduler.tick(&[], &settings);
    assert!(outcome.ran);
    assert!(!outcome.daily_sent);
    assert!(settings.current().last_daily_notification.is_none());

    // Fresh process later in the same minute, tasks now exist.
    clock.advance(Duration::seconds(30));
    let mut restarted = Scheduler::new(clock, notifier.clone());
    let lists = single_list(vec![due_task("New arrival", date(2024, 1, 15))]);
    let outcome = restarted.tick(&lists, &settings);
    assert!(outcome.daily_sent);
    assert_eq!(
        settings.current().last_daily_notification,
        Some(date(2024, 1, 15))
    );
    assert_eq!(notifier.sent_tags(), vec!["daily-summary".to_string()]);
}

#[test]
fn daily_summary_fires_at_most_once_per_day_and_minute() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let settings = enabled_store(&store);

    let lists = single_list(vec![
        due_task("Overdue thing", date(2024, 1, 10)),
        due_task("Today thing", date(2024, 1, 15)),
    ]);

    let clock = TestClock::at(utc(2024, 1, 15, 9, 0, 5));
    let notifier = RecordingNotifier::granted();
    let mut scheduler = Scheduler::new(clock.clone(), notifier.clone());

    let outcome = scheduler.tick(&lists, &settings);
    assert!(outcome.daily_sent);

    // Same minute: the guard suppresses the whole check.
    clock.advance(Duration::seconds(20));
    let outcome = scheduler.tick(&lists, &settings);
    assert!(!outcome.ran);

    // Next day's poll at the reminder time fires again.
    clock.advance(Duration::days(1));
    let outcome = scheduler.tick(&lists, &settings);
    assert!(outcome.daily_sent);
    assert_eq!(notifier.sent.borrow().len(), 2);
}

#[test]
fn failed_sends_leave_guards_unset_for_retry() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let settings = enabled_store(&store);

    let task = due_task("Flaky delivery", date(2024, 1, 16));
    let task_id = task.id;
    let lists = single_list(vec![task]);

    let clock = TestClock::at(utc(2024, 1, 15, 23, 30, 0));
    let notifier = RecordingNotifier::granted();
    notifier.fail_sends.set(true);
    let mut scheduler = Scheduler::new(clock.clone(), notifier.clone());

    let outcome = scheduler.tick(&lists, &settings);
    assert!(outcome.ran);
    assert_eq!(outcome.reminders_sent, 0);
    assert!(!settings.current().has_notified(task_id));

    // Backend recovers; the next poll delivers and records it.
    notifier.fail_sends.set(false);
    clock.advance(Duration::minutes(1));
    let outcome = scheduler.tick(&lists, &settings);
    assert_eq!(outcome.reminders_sent, 1);
    assert!(settings.current().has_notified(task_id));
}

#[test]
fn inactive_states_never_scan() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let settings = SettingsStore::new(&store);

    let lists = single_list(vec![due_task("Should stay quiet", date(2024, 1, 16))]);
    let clock = TestClock::at(utc(2024, 1, 15, 23, 30, 0));
    let notifier = RecordingNotifier::granted();
    let mut scheduler = Scheduler::new(clock, notifier.clone());

    // Disabled settings.
    let outcome = scheduler.tick(&lists, &settings);
    assert_eq!(outcome.state, SchedulerState::Disabled);
    assert!(!outcome.ran);

    // Enabled but permission revoked mid-session.
    settings.update(|s| s.enabled = true);
    notifier.permission.set(Permission::Denied);
    let outcome = scheduler.tick(&lists, &settings);
    assert_eq!(outcome.state, SchedulerState::AwaitingPermission);
    assert!(!outcome.ran);

    // Unsupported backend is equivalent to disabled.
    notifier.permission.set(Permission::Unsupported);
    let outcome = scheduler.tick(&lists, &settings);
    assert_eq!(outcome.state, SchedulerState::Disabled);

    assert!(notifier.sent.borrow().is_empty());
}

#[test]
fn request_permission_mirrors_into_settings() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let settings = SettingsStore::new(&store);
    settings.update(|s| s.enabled = true);

    let notifier = RecordingNotifier::granted();
    let clock = TestClock::at(utc(2024, 1, 15, 9, 0, 0));
    let mut scheduler = Scheduler::new(clock, notifier.clone());

    let permission = scheduler.request_permission(&settings).expect("request");
    assert_eq!(permission, Permission::Granted);
    assert!(settings.current().permission_granted);

    notifier.permission.set(Permission::Denied);
    let permission = scheduler.request_permission(&settings).expect("request");
    assert_eq!(permission, Permission::Denied);
    assert!(!settings.current().permission_granted);
}
