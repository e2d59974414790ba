//! Change detection between a freshly built event body and the stored event.
//!
//! The stored representation's date-time strings may carry a numeric UTC
//! offset suffix that legitimately changes run-to-run across daylight-saving
//! transitions, so timed comparison happens on the naive wall-clock string
//! with any offset stripped. Only a real difference triggers a write.

use regex::Regex;
use std::sync::LazyLock;

use crate::gcal::{EventBody, EventDateTime, EventResource};

static OFFSET_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-][0-9]{1,2}:[0-9]{2}$").unwrap());

/// Drop a trailing numeric UTC offset (`-06:00`, `+05:30`) if present.
fn strip_offset(date_time: &str) -> &str {
    match OFFSET_SUFFIX.find(date_time) {
        Some(m) => &date_time[..m.start()],
        None => date_time,
    }
}

/// Whether two start/end sub-structures differ in a way that requires a write.
///
/// Mismatched all-day-ness (timezone-qualified on one side only) differs;
/// timed values compare on the wall-clock string after offset stripping;
/// bare dates compare directly; a date present on only one side differs.
pub fn datetime_bodies_differ(a: &EventDateTime, b: &EventDateTime) -> bool {
    match (&a.time_zone, &b.time_zone) {
        (Some(_), Some(_)) => match (&a.date_time, &b.date_time) {
            (Some(a_dt), Some(b_dt)) => {
                if strip_offset(a_dt) != strip_offset(b_dt) {
                    return true;
                }
            }
            _ => return true,
        },
        (Some(_), None) | (None, Some(_)) => return true,
        (None, None) => {}
    }

    match (&a.date, &b.date) {
        (Some(a_date), Some(b_date)) => a_date != b_date,
        (None, None) => false,
        _ => true,
    }
}

/// Whether a rebuilt body differs from the stored event in any field that
/// matters: start, end, summary, or description.
pub fn event_differs(fresh: &EventBody, stored: &EventResource) -> bool {
    let empty = EventDateTime::default();
    let stored_start = stored.start.as_ref().unwrap_or(&empty);
    let stored_end = stored.end.as_ref().unwrap_or(&empty);

    if datetime_bodies_differ(&fresh.start, stored_start)
        || datetime_bodies_differ(&fresh.end, stored_end)
    {
        return true;
    }

    fresh.summary != stored.summary || fresh.description != stored.description
}
