//! Time formatting utilities.

use chrono::{DateTime, TimeDelta, Utc};

/// How long ago `at` was, relative to `now`, in the coarsest whole unit.
///
/// Times in the future (clock skew between runs) read as "just now".
#[must_use]
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(at).max(TimeDelta::zero());

    let (count, unit) = if age.num_days() > 0 {
        (age.num_days(), "day")
    } else if age.num_hours() > 0 {
        (age.num_hours(), "hour")
    } else if age.num_minutes() > 0 {
        (age.num_minutes(), "minute")
    } else {
        return "just now".to_string();
    };

    let plural = if count == 1 { "" } else { "s" };
    format!("{count} {unit}{plural} ago")
}
