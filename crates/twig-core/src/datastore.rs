use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use crate::settings::NotificationSettings;
use crate::task::TaskList;

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub settings_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.json");
        let settings_path = data_dir.join("settings.json");

        if !tasks_path.exists() {
            fs::write(&tasks_path, "[]\n")?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            settings = %settings_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            settings_path,
        })
    }

    /// Task trees are user data: a corrupt document is a hard error,
    /// never silently replaced.
    #[tracing::instrument(skip(self))]
    pub fn load_lists(&self) -> anyhow::Result<Vec<TaskList>> {
        let raw = fs::read_to_string(&self.tasks_path)
            .with_context(|| format!("failed reading {}", self.tasks_path.display()))?;
        if raw.trim().is_empty() {
            return Ok(vec![]);
        }
        let lists: Vec<TaskList> = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.tasks_path.display()))?;
        debug!(count = lists.len(), "loaded task lists");
        Ok(lists)
    }

    #[tracing::instrument(skip(self, lists))]
    pub fn save_lists(&self, lists: &[TaskList]) -> anyhow::Result<()> {
        save_json_atomic(&self.tasks_path, lists).context("failed to save tasks.json")
    }

    /// Scheduler bookkeeping is best-effort: a missing or corrupt
    /// record degrades to defaults rather than failing the caller.
    #[tracing::instrument(skip(self))]
    pub fn load_settings(&self) -> NotificationSettings {
        let raw = match fs::read_to_string(&self.settings_path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(
                    file = %self.settings_path.display(),
                    error = %err,
                    "no readable settings file; using defaults"
                );
                return NotificationSettings::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(err) => {
                error!(
                    file = %self.settings_path.display(),
                    error = %err,
                    "corrupt settings file; using defaults"
                );
                NotificationSettings::default()
            }
        }
    }

    /// A failed settings write is logged and dropped; the most recent
    /// change may be lost, which is the accepted tradeoff here.
    #[tracing::instrument(skip(self, settings))]
    pub fn save_settings(&self, settings: &NotificationSettings) {
        if let Err(err) = save_json_atomic(&self.settings_path, settings) {
            error!(
                file = %self.settings_path.display(),
                error = %err,
                "failed to persist notification settings"
            );
        }
    }
}

#[tracing::instrument(skip(path, value))]
fn save_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving json atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    let serialized = serde_json::to_string_pretty(value)?;
    writeln!(temp, "{serialized}")?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::task::{Task, TaskList};

    use super::*;

    #[test]
    fn open_creates_empty_tasks_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        assert!(store.load_lists().expect("load lists").is_empty());
    }

    #[test]
    fn lists_roundtrip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");

        let mut list = TaskList::new("inbox".to_string(), "Inbox".to_string());
        list.tasks.push(Task::new("Water plants".to_string(), 0));
        store.save_lists(&[list]).expect("save lists");

        let loaded = store.load_lists().expect("load lists");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].tasks[0].text, "Water plants");
    }

    #[test]
    fn corrupt_settings_degrade_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");

        fs::write(&store.settings_path, "{not json").expect("write corrupt file");
        let settings = store.load_settings();
        assert!(!settings.enabled);
        assert_eq!(settings.daily_reminder_time, "09:00");
    }

    #[test]
    fn corrupt_tasks_are_a_hard_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");

        fs::write(&store.tasks_path, "{not json").expect("write corrupt file");
        assert!(store.load_lists().is_err());
    }
}
