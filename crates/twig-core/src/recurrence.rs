use anyhow::anyhow;
use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
    /// Captured when persisted data carries a frequency this version
    /// does not recognize; loading still succeeds, scheduling errors,
    /// and the raw string is written back verbatim on save.
    #[value(skip)]
    Unknown(String),
}

impl Serialize for Frequency {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Custom => "custom",
            Frequency::Unknown(raw) => raw.as_str(),
        })
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "custom" => Frequency::Custom,
            _ => Frequency::Unknown(raw),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,

    #[serde(default = "default_interval")]
    pub interval: u32,

    /// Weekday indices, 0 = Sunday .. 6 = Saturday. Weekly only.
    #[serde(default)]
    pub days_of_week: Vec<u8>,

    /// Monthly only. Clamped to the target month's last day.
    #[serde(default)]
    pub day_of_month: Option<u32>,

    /// Inclusive cutoff: no occurrence falls on or after this date.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    pub fn every(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
            days_of_week: vec![],
            day_of_month: None,
            end_date: None,
        }
    }
}

/// Computes the next due date after completing a recurring task on
/// `completed_on`. `Ok(None)` means the recurrence has concluded and
/// the task must not be rescheduled. Malformed rules (zero interval,
/// unrecognized frequency) are an error; callers decide whether to
/// fall back.
#[tracing::instrument(skip(rule), fields(frequency = ?rule.frequency, interval = rule.interval))]
pub fn next_due_date(
    rule: &RecurrenceRule,
    completed_on: NaiveDate,
) -> anyhow::Result<Option<NaiveDate>> {
    if rule.interval == 0 {
        return Err(anyhow!("recurrence interval must be at least 1"));
    }
    if let Frequency::Unknown(raw) = &rule.frequency {
        return Err(anyhow!("unrecognized recurrence frequency: {raw}"));
    }

    if let Some(end) = rule.end_date {
        if completed_on >= end {
            tracing::debug!(%end, %completed_on, "recurrence ended before rescheduling");
            return Ok(None);
        }
    }

    let interval = i64::from(rule.interval);
    let next = match &rule.frequency {
        Frequency::Daily | Frequency::Custom => advance_days(completed_on, interval)?,
        Frequency::Weekly => {
            let days = normalized_weekdays(&rule.days_of_week);
            if days.is_empty() {
                advance_days(completed_on, interval * 7)?
            } else {
                next_weekly_occurrence(completed_on, &days, interval)?
            }
        }
        Frequency::Monthly => next_monthly_occurrence(completed_on, rule.interval, rule.day_of_month)?,
        Frequency::Unknown(raw) => {
            return Err(anyhow!("unrecognized recurrence frequency: {raw}"));
        }
    };

    if let Some(end) = rule.end_date {
        if next >= end {
            tracing::debug!(%end, %next, "computed occurrence falls on or past end date");
            return Ok(None);
        }
    }

    Ok(Some(next))
}

fn advance_days(from: NaiveDate, days: i64) -> anyhow::Result<NaiveDate> {
    from.checked_add_signed(Duration::days(days))
        .ok_or_else(|| anyhow!("date overflow advancing {from} by {days} days"))
}

fn normalized_weekdays(raw: &[u8]) -> Vec<u8> {
    let mut days: Vec<u8> = raw.iter().copied().filter(|d| *d <= 6).collect();
    days.sort_unstable();
    days.dedup();
    days
}

/// Soonest weekday in `days` strictly after the completion weekday in
/// the current week; otherwise the first listed weekday of the week
/// `interval` weeks ahead. Never returns the completion date itself.
fn next_weekly_occurrence(
    completed_on: NaiveDate,
    days: &[u8],
    interval: i64,
) -> anyhow::Result<NaiveDate> {
    let current = completed_on.weekday().num_days_from_sunday() as i64;

    let delta = match days.iter().find(|d| i64::from(**d) > current) {
        Some(next_day) => i64::from(*next_day) - current,
        None => {
            let first = i64::from(days[0]);
            interval * 7 - current + first
        }
    };

    advance_days(completed_on, delta)
}

fn next_monthly_occurrence(
    completed_on: NaiveDate,
    interval: u32,
    day_of_month: Option<u32>,
) -> anyhow::Result<NaiveDate> {
    let shifted = completed_on
        .checked_add_months(Months::new(interval))
        .ok_or_else(|| anyhow!("date overflow advancing {completed_on} by {interval} months"))?;

    let Some(requested) = day_of_month else {
        return Ok(shifted);
    };

    let last = days_in_month(shifted.year(), shifted.month());
    let day = requested.clamp(1, last);
    NaiveDate::from_ymd_opt(shifted.year(), shifted.month(), day).ok_or_else(|| {
        anyhow!(
            "invalid monthly occurrence {}-{:02}-{:02}",
            shifted.year(),
            shifted.month(),
            day
        )
    })
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Human sentence for a rule, total over all inputs.
pub fn describe(rule: &RecurrenceRule) -> String {
    let base = match &rule.frequency {
        Frequency::Daily | Frequency::Custom => {
            if rule.interval == 1 {
                "Daily".to_string()
            } else {
                format!("Every {} days", rule.interval)
            }
        }
        Frequency::Weekly => {
            let head = if rule.interval == 1 {
                "Weekly".to_string()
            } else {
                format!("Every {} weeks", rule.interval)
            };
            let names: Vec<&str> = normalized_weekdays(&rule.days_of_week)
                .iter()
                .filter_map(|d| weekday_name(*d))
                .collect();
            if names.is_empty() {
                head
            } else {
                format!("{} on {}", head, names.join(", "))
            }
        }
        Frequency::Monthly => {
            let head = if rule.interval == 1 {
                "Monthly".to_string()
            } else {
                format!("Every {} months", rule.interval)
            };
            match rule.day_of_month {
                Some(day) => format!("{} on the {}", head, ordinal(day)),
                None => head,
            }
        }
        Frequency::Unknown(_) => "Unrecognized schedule".to_string(),
    };

    match rule.end_date {
        Some(end) => format!("{} until {}", base, end.format("%Y-%m-%d")),
        None => base,
    }
}

fn weekday_name(index: u8) -> Option<&'static str> {
    match index {
        0 => Some("Sun"),
        1 => Some("Mon"),
        2 => Some("Tue"),
        3 => Some("Wed"),
        4 => Some("Thu"),
        5 => Some("Fri"),
        6 => Some("Sat"),
        _ => None,
    }
}

pub fn parse_weekday_token(token: &str) -> Option<u8> {
    match token.trim().to_ascii_lowercase().as_str() {
        "sunday" | "sun" => Some(0),
        "monday" | "mon" => Some(1),
        "tuesday" | "tue" | "tues" => Some(2),
        "wednesday" | "wed" => Some(3),
        "thursday" | "thu" | "thur" | "thurs" => Some(4),
        "friday" | "fri" => Some(5),
        "saturday" | "sat" => Some(6),
        _ => None,
    }
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}
