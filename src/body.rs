//! Build calendar write payloads from parsed feed entries.

use chrono::{DateTime, Datelike, Timelike};
use chrono_tz::Tz;
use std::collections::HashMap;

use crate::feed::FeedEntry;
use crate::gcal::{EventBody, EventDateTime, ExtendedProperties, FEED_ID_PROP};
use crate::schedule::EventSchedule;

/// Build the event payload for one entry.
///
/// All-day events get bare calendar dates; timed events get minute-granularity
/// date-times plus the timezone name. A missing stop means end = start: a
/// single all-day event occupies its one day, and a timed event without a
/// stated end becomes a zero-duration marker rather than being left open.
/// The entry id is embedded as a private extended property so later runs can
/// join stored events back to feed entries.
pub fn build_event_body(
    entry: &FeedEntry,
    schedule: &EventSchedule,
    location: Option<String>,
) -> EventBody {
    let start = datetime_body(schedule.all_day, schedule.start);
    let end = match schedule.stop {
        Some(stop) => datetime_body(schedule.all_day, stop),
        None => start.clone(),
    };

    EventBody {
        summary: schedule.short_title.clone(),
        description: entry.link.clone(),
        start,
        end,
        location,
        extended_properties: ExtendedProperties {
            private: HashMap::from([(FEED_ID_PROP.to_string(), entry.id.clone())]),
        },
    }
}

fn datetime_body(all_day: bool, at: DateTime<Tz>) -> EventDateTime {
    if all_day {
        EventDateTime {
            date: Some(format!("{:04}-{:02}-{:02}", at.year(), at.month(), at.day())),
            ..Default::default()
        }
    } else {
        EventDateTime {
            date_time: Some(format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                at.year(),
                at.month(),
                at.day(),
                at.hour(),
                at.minute(),
                at.second()
            )),
            time_zone: Some(at.timezone().name().to_string()),
            ..Default::default()
        }
    }
}
