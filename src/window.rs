//! Lookup window derived from parsed schedules.

use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;

use crate::schedule::EventSchedule;

/// Time window spanning every valid schedule in a feed, used to bound the
/// backend's event listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl TimeWindow {
    /// Compute the extent over a collection of schedules.
    ///
    /// The max side of an entry is its stop when present, else its start.
    /// All-day entries contribute the full day on both sides so a timed
    /// lookup window contains all-day events on the boundary dates. With no
    /// valid schedules at all the sentinel window (1970..2970) is returned,
    /// which downstream listing treats as an unbounded fetch.
    pub fn from_schedules<'a, I>(schedules: I, tz: Tz) -> TimeWindow
    where
        I: IntoIterator<Item = &'a EventSchedule>,
    {
        let mut min: Option<DateTime<Tz>> = None;
        let mut max: Option<DateTime<Tz>> = None;

        for schedule in schedules {
            let mut low = schedule.start;
            let mut high = schedule.stop.unwrap_or(schedule.start);
            if schedule.all_day {
                // All-day starts sit at midnight already; widen the top end
                // to the last second of its date.
                low = day_floor(low);
                high = day_ceil(high);
            }
            if min.is_none_or(|m| low < m) {
                min = Some(low);
            }
            if max.is_none_or(|m| high > m) {
                max = Some(high);
            }
        }

        match (min, max) {
            (Some(start), Some(end)) => TimeWindow { start, end },
            _ => TimeWindow::sentinel(tz),
        }
    }

    /// Degenerate window used when nothing in the feed parsed.
    pub fn sentinel(tz: Tz) -> TimeWindow {
        TimeWindow {
            start: tz.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap(),
            end: tz.with_ymd_and_hms(2970, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    pub fn start_rfc3339(&self) -> String {
        self.start.to_rfc3339()
    }

    pub fn end_rfc3339(&self) -> String {
        self.end.to_rfc3339()
    }
}

fn day_floor(at: DateTime<Tz>) -> DateTime<Tz> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| at.timezone().from_local_datetime(&naive).earliest())
        .unwrap_or(at)
}

fn day_ceil(at: DateTime<Tz>) -> DateTime<Tz> {
    at.date_naive()
        .and_hms_opt(23, 59, 59)
        .and_then(|naive| at.timezone().from_local_datetime(&naive).latest())
        .unwrap_or(at)
}
