//! Human-readable message timestamps.
//!
//! - same day as `now`: `3:07 PM`
//! - the day before: `Yesterday 3:07 PM`
//! - older: `Mar 4, 3:07 PM`, with the year added when it differs from
//!   `now`'s (`Mar 4, 2025, 3:07 PM`)

use chrono::{DateTime, Datelike, Days, TimeZone};

/// Format an RFC 3339 `timestamp` relative to `now`, in `now`'s time zone.
///
/// Unparseable input is returned unchanged.
#[must_use]
pub fn format_timestamp<Tz: TimeZone>(timestamp: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) else {
        return timestamp.to_string();
    };
    let local = parsed.with_timezone(&now.timezone());
    let time = local.format("%-I:%M %p");

    let today = now.date_naive();
    let day = local.date_naive();
    if day == today {
        return time.to_string();
    }
    if today.checked_sub_days(Days::new(1)) == Some(day) {
        return format!("Yesterday {time}");
    }
    if local.year() == now.year() {
        format!("{}, {time}", local.format("%b %-d"))
    } else {
        format!("{}, {time}", local.format("%b %-d, %Y"))
    }
}

/// Format `timestamp` relative to the current local time.
#[must_use]
pub fn format_local(timestamp: &str) -> String {
    format_timestamp(timestamp, &chrono::Local::now())
}
