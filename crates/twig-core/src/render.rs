use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::recurrence;
use crate::scheduler::DueBuckets;
use crate::task::{Task, TaskList};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, lists, today))]
    pub fn print_tree_table(&mut self, lists: &[TaskList], today: NaiveDate) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Due".to_string(),
            "Pri".to_string(),
            "Task".to_string(),
            "Tags".to_string(),
        ];

        let mut rows = Vec::new();
        for list in lists {
            if lists.len() > 1 {
                rows.push(vec![
                    String::new(),
                    String::new(),
                    String::new(),
                    self.paint(&format!("[{}]", list.name), "36"),
                    String::new(),
                ]);
            }
            for task in &list.tasks {
                self.push_task_rows(&mut rows, task, today);
            }
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    fn push_task_rows(&self, rows: &mut Vec<Vec<String>>, task: &Task, today: NaiveDate) {
        let indent = "  ".repeat(task.level as usize);

        if task.is_header {
            rows.push(vec![
                String::new(),
                String::new(),
                String::new(),
                self.paint(&format!("{indent}{}", task.text), "1"),
                String::new(),
            ]);
        } else {
            let id = self.paint(&short_id(task), "33");

            let due = task
                .due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            let due = match task.due_date {
                Some(d) if d < today && !task.completed => self.paint(&due, "31"),
                _ => due,
            };

            let pri = task.priority.map(|p| p.label().to_string()).unwrap_or_default();

            let mut text = format!("{indent}{}", task.text);
            if task.completed {
                text = self.paint(&text, "2");
            }
            if task.is_recurring {
                text.push_str(" \u{21bb}");
            }

            let tags = task
                .tags
                .iter()
                .map(|tag| format!("+{tag}"))
                .collect::<Vec<_>>()
                .join(" ");

            rows.push(vec![id, due, pri, text, tags]);
        }

        for child in &task.children {
            self.push_task_rows(rows, child, today);
        }
    }

    #[tracing::instrument(skip(self, buckets))]
    pub fn print_agenda(&mut self, buckets: &DueBuckets) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        if buckets.total() == 0 {
            writeln!(out, "Nothing overdue, due today, or due tomorrow.")?;
            return Ok(());
        }

        let sections: [(&str, &[&Task], &str); 3] = [
            ("Overdue", &buckets.overdue, "31"),
            ("Due today", &buckets.due_today, "33"),
            ("Due tomorrow", &buckets.due_tomorrow, "32"),
        ];

        for (label, tasks, code) in sections {
            if tasks.is_empty() {
                continue;
            }
            writeln!(out, "{}", self.paint(label, code))?;
            for task in tasks {
                let due = task
                    .due_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                writeln!(out, "  {}  {}  {}", short_id(task), due, task.text)?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&mut self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id         {}", task.id)?;
        writeln!(out, "text       {}", task.text)?;
        writeln!(out, "level      {}", task.level)?;
        writeln!(out, "completed  {}", task.completed)?;
        if let Some(completed_at) = task.completed_at {
            writeln!(out, "ended      {}", completed_at.format("%Y-%m-%d %H:%M"))?;
        }
        if let Some(due) = task.due_date {
            writeln!(out, "due        {}", due.format("%Y-%m-%d"))?;
        }
        if let Some(priority) = task.priority {
            writeln!(out, "priority   {}", priority.label())?;
        }
        if !task.tags.is_empty() {
            writeln!(out, "tags       {}", task.tags.join(", "))?;
        }
        if let Some(status) = task.status {
            writeln!(out, "status     {status:?}")?;
        }
        if let Some(rule) = &task.recurrence {
            writeln!(out, "repeats    {}", recurrence::describe(rule))?;
        }
        if let Some(notes) = &task.notes {
            writeln!(out, "notes      {notes}")?;
        }
        if task.is_header {
            writeln!(out, "header     true")?;
        }
        if !task.children.is_empty() {
            writeln!(out, "children   {}", task.children.len())?;
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn short_id(task: &Task) -> String {
    task.id.to_string().chars().take(8).collect()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
