use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::config::Config;

const TIMEZONE_ENV_VAR: &str = "TWIG_TIMEZONE";
const TIMEZONE_CONFIG_KEY: &str = "timezone";

static PROJECT_TZ: OnceLock<Tz> = OnceLock::new();

/// Resolves the project timezone once per process: env var first,
/// then the rc file, then UTC. Must run before any date decision.
pub fn configure_timezone(cfg: &Config) {
    let tz = resolve_project_timezone(cfg);
    if PROJECT_TZ.set(tz).is_err() {
        tracing::debug!("project timezone already configured");
    }
}

pub fn project_timezone() -> Tz {
    PROJECT_TZ.get().copied().unwrap_or(chrono_tz::UTC)
}

fn resolve_project_timezone(cfg: &Config) -> Tz {
    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR) {
        if let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR) {
            return tz;
        }
    }

    if let Some(raw) = cfg.get(TIMEZONE_CONFIG_KEY) {
        if let Some(tz) = parse_timezone(&raw, "config:timezone") {
            return tz;
        }
    }

    chrono_tz::UTC
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured project timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(source, timezone = %trimmed, error = %err, "failed to parse timezone id");
            None
        }
    }
}

/// Today as a calendar date in the project timezone.
#[must_use]
pub fn project_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&project_timezone()).date_naive()
}

/// Minute-granularity key ("YYYY-MM-DD HH:MM") used to make scheduler
/// ticks idempotent within one wall-clock minute.
#[must_use]
pub fn minute_key(now: DateTime<Utc>) -> String {
    now.with_timezone(&project_timezone())
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Current clock time ("HH:MM") in the project timezone, for matching
/// against the configured daily reminder time.
#[must_use]
pub fn clock_minute(now: DateTime<Utc>) -> String {
    now.with_timezone(&project_timezone())
        .format("%H:%M")
        .to_string()
}

/// Midnight at the start of `date` in the project timezone, as UTC.
/// A due date is a bare calendar date; "due" means that midnight.
pub fn due_midnight_utc(date: NaiveDate) -> anyhow::Result<DateTime<Utc>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("failed to construct midnight for {date}"))?;

    match project_timezone().from_local_datetime(&midnight) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => {
            tracing::warn!(%date, %first, %second, "ambiguous local midnight; using earliest");
            let chosen = if first <= second { first } else { second };
            Ok(chosen.with_timezone(&Utc))
        }
        // DST gap at midnight: the day effectively starts an hour in.
        LocalResult::None => {
            let shifted = midnight + Duration::hours(1);
            project_timezone()
                .from_local_datetime(&shifted)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| anyhow!("local midnight does not exist in project timezone: {date}"))
        }
    }
}

pub fn parse_due_date(raw: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date (expected YYYY-MM-DD): {raw}"))
}

/// Parses "HH:MM", "H:MM", or "H:MMam/pm" into a zero-padded "HH:MM".
pub fn normalize_clock_time(raw: &str) -> anyhow::Result<String> {
    let (hour, minute) = parse_clock_time(raw)
        .ok_or_else(|| anyhow!("invalid clock time (expected HH:MM): {raw}"))?;
    Ok(format!("{hour:02}:{minute:02}"))
}

fn parse_clock_time(token: &str) -> Option<(u32, u32)> {
    let clock_re =
        Regex::new(r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$").ok()?;
    let captures = clock_re.captures(token.trim())?;

    let raw_hour = captures.name("hour")?.as_str().parse::<u32>().ok()?;
    let minute = captures.name("minute")?.as_str().parse::<u32>().ok()?;
    if minute > 59 {
        return None;
    }

    let hour = if let Some(ampm_match) = captures.name("ampm") {
        let ampm = ampm_match.as_str().to_ascii_lowercase();
        if raw_hour == 0 || raw_hour > 12 {
            return None;
        }
        match ampm.as_str() {
            "am" => {
                if raw_hour == 12 {
                    0
                } else {
                    raw_hour
                }
            }
            "pm" => {
                if raw_hour == 12 {
                    12
                } else {
                    raw_hour + 12
                }
            }
            _ => return None,
        }
    } else {
        if raw_hour > 23 {
            return None;
        }
        raw_hour
    };

    Some((hour, minute))
}
