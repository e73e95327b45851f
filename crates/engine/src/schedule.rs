//! Fire-time computation for trigger schedules.
//!
//! Accepts standard 5-field Unix cron expressions (minute, hour,
//! day-of-month, month, day-of-week) and converts them to the 6-field format
//! (with seconds) understood by the `cron` crate.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::models::{Schedule, WorkflowTrigger};

fn normalize_cron_expr(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// Parse a cron expression, reporting the parser's reason on failure.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, String> {
    cron::Schedule::from_str(&normalize_cron_expr(expression))
        .map_err(|e| format!("invalid cron expression '{expression}': {e}"))
}

/// The first firing of `trigger` strictly after `after`, honouring the
/// trigger's validity window. `None` once the schedule is exhausted.
pub fn next_fire_time(trigger: &WorkflowTrigger, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = match trigger.schedule.as_ref()? {
        Schedule::Cron { expression } => {
            let from = match trigger.start_at {
                // `after()` is exclusive, step back so a firing exactly at
                // the window start is kept.
                Some(start) if start > after => start - chrono::Duration::milliseconds(1),
                _ => after,
            };
            parse_cron(expression).ok()?.after(&from).next()?
        }
        Schedule::Fixed { fire_at } => {
            if *fire_at <= after {
                return None;
            }
            *fire_at
        }
    };

    match trigger.end_at {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}
