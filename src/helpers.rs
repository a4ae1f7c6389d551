//! Shared helpers for presenting data ages.

use chrono::{DateTime, Utc};

/// Human-readable age of `then` relative to `now`: "5 minutes", "2 hours",
/// "1 day". Uses the largest whole unit; anything under a minute (including
/// timestamps in the future) reads as "0 minutes".
pub(crate) fn format_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let minutes = (now - then).num_minutes().max(0);
    let (count, unit) = if minutes >= 24 * 60 {
        (minutes / (24 * 60), "day")
    } else if minutes >= 60 {
        (minutes / 60, "hour")
    } else {
        (minutes, "minute")
    };
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}
