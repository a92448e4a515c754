use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::tempdir;
use twig_core::commands::{CompletionOutcome, complete_task};
use twig_core::datastore::DataStore;
use twig_core::recurrence::{Frequency, RecurrenceRule};
use twig_core::task::{Task, TaskList};

#[test]
fn datastore_roundtrip_and_recurring_completion() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let mut task = Task::new("Water plants".to_string(), 0);
    task.tags = vec!["home".to_string()];
    task.is_recurring = true;
    task.recurrence = Some(RecurrenceRule::every(Frequency::Daily, 3));
    task.due_date = Some(NaiveDate::from_ymd_opt(2024, 1, 15).expect("date"));
    let task_id = task.id;

    let mut list = TaskList::new("inbox".to_string(), "Inbox".to_string());
    list.tasks.push(task);
    store.save_lists(&[list]).expect("save lists");

    let mut lists = store.load_lists().expect("load lists");
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].tasks[0].tags, vec!["home".to_string()]);

    let now = Utc
        .with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
        .single()
        .expect("valid now");
    let outcome = complete_task(&mut lists, task_id, now).expect("complete");
    assert_eq!(
        outcome,
        CompletionOutcome::Rescheduled(NaiveDate::from_ymd_opt(2024, 1, 18).expect("date"))
    );
    store.save_lists(&lists).expect("save lists");

    // The reschedule survives a reload: still pending, new due date.
    let reloaded = store.load_lists().expect("reload lists");
    let task = &reloaded[0].tasks[0];
    assert!(!task.completed);
    assert_eq!(
        task.due_date,
        Some(NaiveDate::from_ymd_opt(2024, 1, 18).expect("date"))
    );
}
