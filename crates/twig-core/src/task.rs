use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::RecurrenceRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoardStatus {
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub level: u32,

    #[serde(default)]
    pub due_date: Option<NaiveDate>,

    #[serde(default)]
    pub priority: Option<Priority>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    pub status: Option<BoardStatus>,

    #[serde(default)]
    pub is_recurring: bool,

    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,

    #[serde(default)]
    pub is_header: bool,

    #[serde(default)]
    pub children: Vec<Task>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(text: String, level: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            completed: false,
            completed_at: None,
            level,
            due_date: None,
            priority: None,
            tags: vec![],
            notes: None,
            status: None,
            is_recurring: false,
            recurrence: None,
            is_header: false,
            children: vec![],
            extra: BTreeMap::new(),
        }
    }

    /// Headers are section dividers; they carry children but are never
    /// counted, scheduled, or completed themselves.
    pub fn is_actionable(&self) -> bool {
        !self.is_header
    }

    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Task)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// A named task tree root. Children are owned exclusively by their
/// parent node; the datastore persists a flat list of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskList {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            tasks: vec![],
        }
    }

    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Task)) {
        for task in &self.tasks {
            task.walk(visit);
        }
    }
}

pub fn find<'a>(tasks: &'a [Task], id: Uuid) -> Option<&'a Task> {
    for task in tasks {
        if task.id == id {
            return Some(task);
        }
        if let Some(found) = find(&task.children, id) {
            return Some(found);
        }
    }
    None
}

pub fn find_mut(tasks: &mut [Task], id: Uuid) -> Option<&mut Task> {
    for task in tasks {
        if task.id == id {
            return Some(task);
        }
        if let Some(found) = find_mut(&mut task.children, id) {
            return Some(found);
        }
    }
    None
}

/// Detaches the subtree rooted at `id`, returning it when found.
pub fn remove(tasks: &mut Vec<Task>, id: Uuid) -> Option<Task> {
    if let Some(idx) = tasks.iter().position(|t| t.id == id) {
        return Some(tasks.remove(idx));
    }
    for task in tasks {
        if let Some(removed) = remove(&mut task.children, id) {
            return Some(removed);
        }
    }
    None
}

pub fn collect_ids(task: &Task) -> Vec<Uuid> {
    let mut ids = Vec::new();
    task.walk(&mut |t| ids.push(t.id));
    ids
}

pub fn count_actionable(tasks: &[Task]) -> (usize, usize) {
    let mut total = 0;
    let mut completed = 0;
    for task in tasks {
        task.walk(&mut |t| {
            if t.is_actionable() {
                total += 1;
                if t.completed {
                    completed += 1;
                }
            }
        });
    }
    (total, completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Vec<Task> {
        let mut header = Task::new("Errands".to_string(), 0);
        header.is_header = true;

        let mut parent = Task::new("Groceries".to_string(), 1);
        let mut child = Task::new("Milk".to_string(), 2);
        child.completed = true;
        parent.children.push(child);
        header.children.push(parent);

        vec![header]
    }

    #[test]
    fn headers_excluded_from_counts() {
        let tasks = sample_tree();
        let (total, completed) = count_actionable(&tasks);
        assert_eq!(total, 2);
        assert_eq!(completed, 1);
    }

    #[test]
    fn find_and_remove_reach_nested_nodes() {
        let mut tasks = sample_tree();
        let child_id = tasks[0].children[0].children[0].id;

        assert_eq!(
            find(&tasks, child_id).map(|t| t.text.as_str()),
            Some("Milk")
        );

        let removed = remove(&mut tasks, child_id).expect("remove nested task");
        assert_eq!(removed.text, "Milk");
        assert!(find(&tasks, child_id).is_none());
    }

    #[test]
    fn unknown_json_fields_survive_roundtrip() {
        let raw = r##"{
            "id": "5d3f8b2e-3c4f-4c68-9e0a-111111111111",
            "text": "Water plants",
            "dueDate": "2024-01-15",
            "customColor": "#ff00aa"
        }"##;

        let task: Task = serde_json::from_str(raw).expect("parse task");
        assert_eq!(task.due_date, Some(chrono::NaiveDate::from_ymd_opt(2024, 1, 15).expect("date")));
        assert_eq!(
            task.extra.get("customColor").and_then(|v| v.as_str()),
            Some("#ff00aa")
        );

        let back = serde_json::to_value(&task).expect("serialize task");
        assert_eq!(back["customColor"], "#ff00aa");
        assert_eq!(back["dueDate"], "2024-01-15");
    }
}
