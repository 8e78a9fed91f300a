//! Cron parsing and next-fire computation, plus natural-language schedule
//! shortcuts ("daily at 9am", "every 5m", "in 2h") that lower to either a
//! 5-field cron expression or a one-shot instant.

use chrono::{DateTime, Utc};
use croner::Cron;
use regex::Regex;

use crate::error::{CoreError, CoreResult};

/// What a schedule string lowers to: a recurring cron expression, or a
/// single absolute fire time (one-shot job, null cron).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron(String),
    Once(DateTime<Utc>),
}

/// Validate a 5-field cron expression.
pub fn validate_cron(expr: &str) -> CoreResult<()> {
    Cron::new(expr)
        .parse()
        .map(|_| ())
        .map_err(|e| CoreError::validation(format!("invalid cron expression '{}': {}", expr, e)))
}

/// The next fire strictly after `after`, or None when the expression admits
/// no future fire.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> CoreResult<Option<DateTime<Utc>>> {
    let cron: Cron = Cron::new(expr)
        .parse()
        .map_err(|e| CoreError::validation(format!("invalid cron expression '{}': {}", expr, e)))?;
    Ok(cron.find_next_occurrence(&after, false).ok())
}

/// Parse a schedule string: natural shortcuts, relative one-shots, or raw
/// 5-field cron pass-through.
pub fn parse_schedule(input: &str) -> CoreResult<Schedule> {
    let input = input.trim();

    match input.to_lowercase().as_str() {
        "hourly" => return Ok(Schedule::Cron("0 * * * *".to_string())),
        "daily" => return Ok(Schedule::Cron("0 0 * * *".to_string())),
        "weekly" => return Ok(Schedule::Cron("0 0 * * 0".to_string())),
        "monthly" => return Ok(Schedule::Cron("0 0 1 * *".to_string())),
        _ => {}
    }

    // "every Nm" / "every N minutes"
    let re_minutes = regex(r"(?i)^every\s+(\d+)\s*(?:m|min|mins|minutes?)$")?;
    if let Some(caps) = re_minutes.captures(input) {
        let n: u32 = parse_num(&caps[1])?;
        if n == 0 || n > 59 {
            return Err(CoreError::validation(
                "minutes interval must be between 1 and 59",
            ));
        }
        return Ok(Schedule::Cron(format!("*/{} * * * *", n)));
    }

    // "every Nh" / "every N hours"
    let re_hours = regex(r"(?i)^every\s+(\d+)\s*(?:h|hrs?|hours?)$")?;
    if let Some(caps) = re_hours.captures(input) {
        let n: u32 = parse_num(&caps[1])?;
        if n == 0 || n > 23 {
            return Err(CoreError::validation(
                "hours interval must be between 1 and 23",
            ));
        }
        return Ok(Schedule::Cron(format!("0 */{} * * *", n)));
    }

    // "daily at 9am" / "daily at 14:30" / "daily at 2:30pm"
    let re_daily = regex(r"(?i)^daily\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$")?;
    if let Some(caps) = re_daily.captures(input) {
        let (hour, minute) = parse_time_captures(&caps)?;
        return Ok(Schedule::Cron(format!("{} {} * * *", minute, hour)));
    }

    // "weekdays at 8:30"
    let re_weekdays = regex(r"(?i)^weekdays?\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$")?;
    if let Some(caps) = re_weekdays.captures(input) {
        let (hour, minute) = parse_time_captures(&caps)?;
        return Ok(Schedule::Cron(format!("{} {} * * 1-5", minute, hour)));
    }

    // "weekends at 10am"
    let re_weekends = regex(r"(?i)^weekends?\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$")?;
    if let Some(caps) = re_weekends.captures(input) {
        let (hour, minute) = parse_time_captures(&caps)?;
        return Ok(Schedule::Cron(format!("{} {} * * 0,6", minute, hour)));
    }

    // "in 30m" / "in 2 hours" — relative one-shot
    let re_in = regex(r"(?i)^in\s+(\d+)\s*(m|min|mins|minutes?|h|hrs?|hours?)$")?;
    if let Some(caps) = re_in.captures(input) {
        let n: i64 = parse_num(&caps[1])?;
        if n <= 0 {
            return Err(CoreError::validation("relative schedule must be positive"));
        }
        let duration = if caps[2].to_lowercase().starts_with('h') {
            chrono::Duration::hours(n)
        } else {
            chrono::Duration::minutes(n)
        };
        return Ok(Schedule::Once(Utc::now() + duration));
    }

    // RFC-3339 absolute one-shot
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        let at = at.with_timezone(&Utc);
        if at <= Utc::now() {
            return Err(CoreError::validation(format!(
                "schedule time '{}' is in the past",
                input
            )));
        }
        return Ok(Schedule::Once(at));
    }

    // Raw cron pass-through
    if input.split_whitespace().count() == 5 {
        validate_cron(input)?;
        return Ok(Schedule::Cron(input.to_string()));
    }

    Err(CoreError::validation(format!(
        "unrecognized schedule '{}'; use shortcuts like 'daily at 9am', 'every 5m', 'in 2h', an RFC-3339 instant, or a 5-field cron expression",
        input
    )))
}

fn regex(pattern: &str) -> CoreResult<Regex> {
    Regex::new(pattern).map_err(|e| CoreError::Internal(format!("bad schedule regex: {}", e)))
}

fn parse_num<T: std::str::FromStr>(raw: &str) -> CoreResult<T> {
    raw.parse()
        .map_err(|_| CoreError::validation(format!("bad number '{}' in schedule", raw)))
}

fn parse_time_captures(caps: &regex::Captures) -> CoreResult<(u32, u32)> {
    let mut hour: u32 = parse_num(&caps[1])?;
    let minute: u32 = match caps.get(2) {
        Some(m) => parse_num(m.as_str())?,
        None => 0,
    };
    if let Some(ampm) = caps.get(3) {
        let ampm = ampm.as_str().to_lowercase();
        if ampm == "pm" && hour < 12 {
            hour += 12;
        } else if ampm == "am" && hour == 12 {
            hour = 0;
        }
    }
    if hour > 23 {
        return Err(CoreError::validation("hour must be between 0 and 23"));
    }
    if minute > 59 {
        return Err(CoreError::validation("minute must be between 0 and 59"));
    }
    Ok((hour, minute))
}
