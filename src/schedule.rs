//! Title date-clause parsing.
//!
//! Feed entry titles have the fixed shape `"<description>: <dateclause>"`.
//! The published timestamp on an entry only carries the start instant, so the
//! date clause in the title is the sole source of end times, date ranges, and
//! the all-day/timed distinction. Five clause shapes are recognized, tried in
//! priority order; an unmatched title marks the entry invalid without
//! aborting the rest of the feed.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::LazyLock;

/// A parsed event schedule, localized in the feed's civil timezone.
///
/// When `all_day` is true, `start`/`stop` sit at midnight of the calendar
/// date; otherwise they carry minute granularity. `stop` is `None` for
/// single-day all-day events and for timed events without an end clause.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSchedule {
    pub all_day: bool,
    pub start: DateTime<Tz>,
    pub stop: Option<DateTime<Tz>>,
    pub short_title: String,
}

/// The recognized date-clause shapes, in match priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum DateClause {
    /// `M/D/YYYY`
    AllDaySingle { date: NaiveDate },
    /// `M/D/YYYY - M/D/YYYY`
    AllDayRanged { start: NaiveDate, stop: NaiveDate },
    /// `M/D/YYYY H[:MM] AM|PM`
    TimedSingle { start: NaiveDateTime },
    /// `M/D/YYYY H[:MM] AM|PM - H[:MM] AM|PM` (end on the same date)
    TimedSameDayRanged { start: NaiveDateTime, stop_time: NaiveTime },
    /// `M/D/YYYY H[:MM] AM|PM - M/D/YYYY H[:MM] AM|PM`
    TimedCrossDayRanged { start: NaiveDateTime, stop: NaiveDateTime },
}

const DATE: &str = r"([0-9]{1,2}/[0-9]{1,2}/[0-9]{4})";
const TIME: &str = r"([0-9]{1,2}(?::[0-9]{2})? (?:AM|PM))";

static ALL_DAY_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^(.*): {DATE}$")).unwrap());
static ALL_DAY_RANGED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^(.*): {DATE} - {DATE}$")).unwrap());
static TIMED_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^(.*): {DATE} {TIME}$")).unwrap());
static TIMED_SAME_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^(.*): {DATE} {TIME} - {TIME}$")).unwrap());
static TIMED_CROSS_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^(.*): {DATE} {TIME} - {DATE} {TIME}$")).unwrap());

/// Parse `M/D/YYYY`
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%m/%d/%Y").ok()
}

/// Parse `H[:MM] AM|PM` into a time of day
fn parse_clock(s: &str) -> Option<NaiveTime> {
    let (clock, meridiem) = s.rsplit_once(' ')?;
    let (hour, minute) = match clock.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (clock.parse::<u32>().ok()?, 0),
    };
    if hour == 0 || hour > 12 || minute > 59 {
        return None;
    }
    let hour24 = match (meridiem, hour) {
        ("AM", 12) => 0,
        ("AM", h) => h,
        ("PM", 12) => 12,
        ("PM", h) => h + 12,
        _ => return None,
    };
    NaiveTime::from_hms_opt(hour24, minute, 0)
}

/// Match a title against the clause shapes, first match wins.
/// Returns the short title (description) and the tagged clause.
pub fn match_clause(title: &str) -> Option<(String, DateClause)> {
    if let Some(caps) = ALL_DAY_SINGLE.captures(title) {
        let date = parse_date(&caps[2])?;
        return Some((caps[1].to_string(), DateClause::AllDaySingle { date }));
    }
    if let Some(caps) = ALL_DAY_RANGED.captures(title) {
        let start = parse_date(&caps[2])?;
        let stop = parse_date(&caps[3])?;
        return Some((caps[1].to_string(), DateClause::AllDayRanged { start, stop }));
    }
    if let Some(caps) = TIMED_SINGLE.captures(title) {
        let start = parse_date(&caps[2])?.and_time(parse_clock(&caps[3])?);
        return Some((caps[1].to_string(), DateClause::TimedSingle { start }));
    }
    if let Some(caps) = TIMED_SAME_DAY.captures(title) {
        let start = parse_date(&caps[2])?.and_time(parse_clock(&caps[3])?);
        let stop_time = parse_clock(&caps[4])?;
        return Some((
            caps[1].to_string(),
            DateClause::TimedSameDayRanged { start, stop_time },
        ));
    }
    if let Some(caps) = TIMED_CROSS_DAY.captures(title) {
        let start = parse_date(&caps[2])?.and_time(parse_clock(&caps[3])?);
        let stop = parse_date(&caps[4])?.and_time(parse_clock(&caps[5])?);
        return Some((
            caps[1].to_string(),
            DateClause::TimedCrossDayRanged { start, stop },
        ));
    }
    None
}

/// Resolve a naive local timestamp in the feed's timezone.
///
/// The zone's standard/daylight offset for the specific date applies, so
/// summer and winter dates round-trip consistently against the feed's
/// UTC-expressed published instants. An ambiguous local time (fall-back hour)
/// resolves to the earlier offset; a nonexistent one (spring-forward gap)
/// fails the parse for that entry.
fn localize(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest()
}

fn localize_date(tz: Tz, date: NaiveDate) -> Option<DateTime<Tz>> {
    localize(tz, date.and_hms_opt(0, 0, 0)?)
}

/// Parse a feed entry title into a schedule.
///
/// Returns `None` when no clause shape matches, when a range runs backwards,
/// or when a timestamp cannot be localized; callers log and skip the entry.
pub fn parse_title(title: &str, tz: Tz) -> Option<EventSchedule> {
    let (short_title, clause) = match_clause(title)?;

    let (all_day, start, stop) = match clause {
        DateClause::AllDaySingle { date } => (true, localize_date(tz, date)?, None),
        DateClause::AllDayRanged { start, stop } => {
            if stop < start {
                return None;
            }
            (true, localize_date(tz, start)?, Some(localize_date(tz, stop)?))
        }
        DateClause::TimedSingle { start } => (false, localize(tz, start)?, None),
        DateClause::TimedSameDayRanged { start, stop_time } => {
            let stop = start.date().and_time(stop_time);
            if stop < start {
                return None;
            }
            (false, localize(tz, start)?, Some(localize(tz, stop)?))
        }
        DateClause::TimedCrossDayRanged { start, stop } => {
            if stop < start {
                return None;
            }
            (false, localize(tz, start)?, Some(localize(tz, stop)?))
        }
    };

    Some(EventSchedule {
        all_day,
        start,
        stop,
        short_title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Chicago;

    #[test]
    fn test_all_day_single() {
        let schedule = parse_title("Pack Meeting: 1/13/2016", Chicago).unwrap();
        assert!(schedule.all_day);
        assert_eq!(schedule.short_title, "Pack Meeting");
        assert_eq!(
            schedule.start,
            Chicago.with_ymd_and_hms(2016, 1, 13, 0, 0, 0).unwrap()
        );
        assert_eq!(schedule.stop, None);
    }

    #[test]
    fn test_all_day_ranged() {
        let schedule = parse_title("Camp: 7/19/2017 - 7/28/2017", Chicago).unwrap();
        assert!(schedule.all_day);
        assert_eq!(schedule.short_title, "Camp");
        assert_eq!(
            schedule.start,
            Chicago.with_ymd_and_hms(2017, 7, 19, 0, 0, 0).unwrap()
        );
        assert_eq!(
            schedule.stop,
            Some(Chicago.with_ymd_and_hms(2017, 7, 28, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_timed_single() {
        let schedule = parse_title("Roundtable: 1/17/2016 2 PM", Chicago).unwrap();
        assert!(!schedule.all_day);
        assert_eq!(
            schedule.start,
            Chicago.with_ymd_and_hms(2016, 1, 17, 14, 0, 0).unwrap()
        );
        assert_eq!(schedule.stop, None);
    }

    #[test]
    fn test_timed_same_day_ranged() {
        let schedule = parse_title("Meeting: 1/17/2016 2 PM - 3:30 PM", Chicago).unwrap();
        assert!(!schedule.all_day);
        assert_eq!(schedule.short_title, "Meeting");
        assert_eq!(
            schedule.start,
            Chicago.with_ymd_and_hms(2016, 1, 17, 14, 0, 0).unwrap()
        );
        assert_eq!(
            schedule.stop,
            Some(Chicago.with_ymd_and_hms(2016, 1, 17, 15, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_timed_cross_day_ranged() {
        let schedule =
            parse_title("Lock-In: 1/22/2016 5:30 PM - 1/23/2016 10 AM", Chicago).unwrap();
        assert!(!schedule.all_day);
        assert_eq!(
            schedule.start,
            Chicago.with_ymd_and_hms(2016, 1, 22, 17, 30, 0).unwrap()
        );
        assert_eq!(
            schedule.stop,
            Some(Chicago.with_ymd_and_hms(2016, 1, 23, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_unparseable_titles() {
        assert!(parse_title("No date clause here", Chicago).is_none());
        assert!(parse_title("Meeting: tomorrow", Chicago).is_none());
        assert!(parse_title("Meeting: 1/17/16", Chicago).is_none());
        assert!(parse_title("Meeting: 13/40/2016", Chicago).is_none());
        // Backwards ranges never construct a schedule
        assert!(parse_title("Camp: 7/28/2017 - 7/19/2017", Chicago).is_none());
        assert!(parse_title("Meeting: 1/17/2016 3 PM - 2 PM", Chicago).is_none());
    }

    #[test]
    fn test_clause_priority_keeps_colons_in_description() {
        // Only the trailing clause is stripped, descriptions may contain colons
        let schedule = parse_title("Den 4: Planning: 1/13/2016", Chicago).unwrap();
        assert_eq!(schedule.short_title, "Den 4: Planning");
    }

    #[test]
    fn test_twelve_hour_conversion() {
        let noon = parse_title("A: 1/17/2016 12 PM", Chicago).unwrap();
        assert_eq!(
            noon.start,
            Chicago.with_ymd_and_hms(2016, 1, 17, 12, 0, 0).unwrap()
        );
        let midnight = parse_title("A: 1/17/2016 12 AM", Chicago).unwrap();
        assert_eq!(
            midnight.start,
            Chicago.with_ymd_and_hms(2016, 1, 17, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_dst_offsets_round_trip() {
        // January is CST (-6), July is CDT (-5); the same wall-clock time
        // maps to different UTC instants depending on the date.
        let winter = parse_title("A: 1/17/2016 2 PM", Chicago).unwrap();
        assert_eq!(winter.start.to_utc().to_rfc3339(), "2016-01-17T20:00:00+00:00");

        let summer = parse_title("A: 7/17/2016 2 PM", Chicago).unwrap();
        assert_eq!(summer.start.to_utc().to_rfc3339(), "2016-07-17T19:00:00+00:00");
    }

    #[test]
    fn test_tagged_clause_variants() {
        assert!(matches!(
            match_clause("A: 1/13/2016").unwrap().1,
            DateClause::AllDaySingle { .. }
        ));
        assert!(matches!(
            match_clause("A: 1/13/2016 - 1/14/2016").unwrap().1,
            DateClause::AllDayRanged { .. }
        ));
        assert!(matches!(
            match_clause("A: 1/13/2016 2 PM").unwrap().1,
            DateClause::TimedSingle { .. }
        ));
        assert!(matches!(
            match_clause("A: 1/13/2016 2 PM - 3 PM").unwrap().1,
            DateClause::TimedSameDayRanged { .. }
        ));
        assert!(matches!(
            match_clause("A: 1/13/2016 2 PM - 1/14/2016 3 PM").unwrap().1,
            DateClause::TimedCrossDayRanged { .. }
        ));
    }
}
