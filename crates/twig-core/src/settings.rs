use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datastore::DataStore;

/// Persisted notification settings. Every field defaults so that a
/// record written by an older version still loads (merge-forward).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub enabled: bool,

    /// Mirror of the notification backend's permission state; the
    /// backend remains authoritative while a process is running.
    pub permission_granted: bool,

    pub daily_reminder_enabled: bool,
    pub daily_reminder_time: String,

    pub before_due_enabled: bool,
    pub before_due_minutes: u32,

    /// Date guard: at most one daily summary per calendar day, set
    /// only after a send that succeeded.
    pub last_daily_notification: Option<NaiveDate>,

    /// Task ids already reminded. Never reset automatically; pruned
    /// when tasks are deleted.
    pub notified_task_ids: Vec<Uuid>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            permission_granted: false,
            daily_reminder_enabled: true,
            daily_reminder_time: "09:00".to_string(),
            before_due_enabled: true,
            before_due_minutes: 60,
            last_daily_notification: None,
            notified_task_ids: vec![],
        }
    }
}

impl NotificationSettings {
    pub fn has_notified(&self, id: Uuid) -> bool {
        self.notified_task_ids.contains(&id)
    }
}

/// All settings mutations go through `update`, which re-reads the
/// persisted record, applies the change, and writes back. Callers
/// never hold a snapshot across a mutation, so interleaved updates
/// cannot lose each other's writes.
#[derive(Debug)]
pub struct SettingsStore<'a> {
    store: &'a DataStore,
}

impl<'a> SettingsStore<'a> {
    pub fn new(store: &'a DataStore) -> Self {
        Self { store }
    }

    pub fn current(&self) -> NotificationSettings {
        self.store.load_settings()
    }

    pub fn update<F>(&self, mutate: F) -> NotificationSettings
    where
        F: FnOnce(&mut NotificationSettings),
    {
        let mut settings = self.store.load_settings();
        mutate(&mut settings);
        self.store.save_settings(&settings);
        settings
    }

    pub fn mark_daily_sent(&self, date: NaiveDate) -> NotificationSettings {
        self.update(|s| s.last_daily_notification = Some(date))
    }

    pub fn mark_task_notified(&self, id: Uuid) -> NotificationSettings {
        self.update(|s| {
            if !s.notified_task_ids.contains(&id) {
                s.notified_task_ids.push(id);
            }
        })
    }

    /// Drops reminder bookkeeping for ids that no longer exist in any
    /// task tree (tasks were deleted).
    pub fn prune_notified(&self, alive: &[Uuid]) -> NotificationSettings {
        self.update(|s| s.notified_task_ids.retain(|id| alive.contains(id)))
    }
}
