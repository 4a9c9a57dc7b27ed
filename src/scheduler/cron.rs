//! Five-field cron expressions
//!
//! `minute hour day-of-month month day-of-week`, evaluated in UTC. Each field
//! accepts `*`, a number, a range `a-b`, a step `*/n`, `a-b/n` or `a/n`, and
//! comma-separated lists of those. Day-of-week runs 0-7 with both 0 and 7
//! meaning Sunday.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

use crate::config::settings::DEFAULT_SCHEDULE;

/// How far ahead `next_after` searches before giving up
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// A cron expression that failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cron expression '{expression}': {reason}")]
pub struct CronError {
    pub expression: String,
    pub reason: String,
}

/// Set of allowed values for one field, as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn range(min: u32, max: u32) -> Self {
        let mut set = FieldSet(0);
        for value in min..=max {
            set.insert(value);
        }
        set
    }

    fn single(value: u32) -> Self {
        FieldSet(1 << value)
    }

    fn insert(&mut self, value: u32) {
        self.0 |= 1 << value;
    }

    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7 };

/// A validated cron schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    /// Day fields that were not written with a leading `*`
    dom_restricted: bool,
    dow_restricted: bool,
    raw: String,
}

impl CronSchedule {
    /// Parse a five-field expression
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let fail = |reason: String| CronError {
            expression: expression.trim().to_string(),
            reason,
        };

        if fields.len() != 5 {
            return Err(fail(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], MINUTE).map_err(&fail)?;
        let hours = parse_field(fields[1], HOUR).map_err(&fail)?;
        let days_of_month = parse_field(fields[2], DAY_OF_MONTH).map_err(&fail)?;
        let months = parse_field(fields[3], MONTH).map_err(&fail)?;
        let mut days_of_week = parse_field(fields[4], DAY_OF_WEEK).map_err(&fail)?;

        if days_of_week.contains(7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
            raw: fields.join(" "),
        })
    }

    /// The expression as written, with whitespace normalized
    pub fn expression(&self) -> &str {
        &self.raw
    }

    /// The first firing time strictly after `after`
    ///
    /// Returns `None` for expressions that can never fire, such as
    /// `0 0 30 2 *`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = after + Duration::days(SEARCH_HORIZON_DAYS);
        let mut candidate = start;

        while candidate <= horizon {
            if !self.months.contains(candidate.month()) {
                candidate = start_of_next_month(candidate)?;
                continue;
            }
            if !self.day_matches(candidate.date_naive()) {
                candidate = start_of_day(candidate.date_naive().succ_opt()?);
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = candidate.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        // Standard cron: when both day fields are restricted either may match
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// Short human-readable form for common shapes
    pub fn describe(&self) -> String {
        let fields: Vec<&str> = self.raw.split(' ').collect();
        let number = |i: usize| fields[i].parse::<u32>().ok();
        let is_star = |i: usize| fields[i] == "*";

        match (number(0), number(1)) {
            (Some(minute), Some(hour)) if is_star(3) => {
                let time = format!("{:02}:{:02} UTC", hour, minute);
                if is_star(2) && is_star(4) {
                    return format!("daily at {}", time);
                }
                if is_star(2) {
                    if let Some(day) = number(4) {
                        return format!("weekly on {} at {}", WEEKDAYS[(day % 7) as usize], time);
                    }
                }
                if is_star(4) {
                    if let Some(day) = number(2) {
                        return format!("monthly on day {} at {}", day, time);
                    }
                }
            }
            (Some(minute), None) if fields[1..].iter().all(|f| *f == "*") => {
                return format!("hourly at minute {}", minute);
            }
            _ => {}
        }

        if fields[1..].iter().all(|f| *f == "*") {
            if fields[0] == "*" {
                return "every minute".to_string();
            }
            if let Some(step) = fields[0].strip_prefix("*/").and_then(|s| s.parse::<u32>().ok()) {
                return format!("every {} minutes", step);
            }
        }

        format!("cron: {}", self.raw)
    }
}

impl Default for CronSchedule {
    /// Daily at 02:00 UTC
    fn default() -> Self {
        Self {
            minutes: FieldSet::single(0),
            hours: FieldSet::single(2),
            days_of_month: FieldSet::range(DAY_OF_MONTH.min, DAY_OF_MONTH.max),
            months: FieldSet::range(MONTH.min, MONTH.max),
            days_of_week: FieldSet::range(DAY_OF_WEEK.min, DAY_OF_WEEK.max),
            dom_restricted: false,
            dow_restricted: false,
            raw: DEFAULT_SCHEDULE.to_string(),
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_field(field: &str, spec: FieldSpec) -> Result<FieldSet, String> {
    let mut set = FieldSet(0);

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("step must be positive in {} field", spec.name));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            let start = parse_value(a, spec)?;
            let end = parse_value(b, spec)?;
            if start > end {
                return Err(format!("range {} is reversed in {} field", range, spec.name));
            }
            (start, end)
        } else {
            let value = parse_value(range, spec)?;
            // `a/n` runs from a to the end of the field
            if step.is_some() {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            set.insert(value);
        }
    }

    Ok(set)
}

fn parse_value(raw: &str, spec: FieldSpec) -> Result<u32, String> {
    let value: u32 = raw
        .parse()
        .map_err(|_| format!("invalid value '{}' in {} field", raw, spec.name))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} out of range ({}-{}) in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::default()))
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).map(start_of_day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_default_is_daily_at_two() {
        let schedule = CronSchedule::default();
        assert_eq!(schedule.to_string(), "0 2 * * *");
        assert_eq!(schedule, "0 2 * * *".parse().unwrap());
        assert_eq!(schedule.describe(), "daily at 02:00 UTC");
    }

    #[test]
    fn test_next_daily() {
        let schedule = CronSchedule::default();
        assert_eq!(schedule.next_after(at(2025, 3, 10, 1, 59)), Some(at(2025, 3, 10, 2, 0)));
        assert_eq!(schedule.next_after(at(2025, 3, 10, 2, 0)), Some(at(2025, 3, 11, 2, 0)));
        assert_eq!(schedule.next_after(at(2025, 12, 31, 3, 0)), Some(at(2026, 1, 1, 2, 0)));
    }

    #[test]
    fn test_next_is_strictly_after_with_seconds() {
        let schedule: CronSchedule = "* * * * *".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 15, 42).unwrap();
        assert_eq!(schedule.next_after(now), Some(at(2025, 1, 1, 10, 16)));
    }

    #[test]
    fn test_steps_ranges_and_lists() {
        let schedule: CronSchedule = "*/15 9-17 * * 1-5".parse().unwrap();
        // Saturday 2025-03-15 rolls to Monday
        assert_eq!(schedule.next_after(at(2025, 3, 15, 12, 0)), Some(at(2025, 3, 17, 9, 0)));
        assert_eq!(schedule.next_after(at(2025, 3, 17, 9, 0)), Some(at(2025, 3, 17, 9, 15)));
        assert_eq!(schedule.next_after(at(2025, 3, 17, 17, 45)), Some(at(2025, 3, 18, 9, 0)));

        let schedule: CronSchedule = "5,35 0-6/3 * * *".parse().unwrap();
        assert_eq!(schedule.next_after(at(2025, 1, 1, 0, 5)), Some(at(2025, 1, 1, 0, 35)));
        assert_eq!(schedule.next_after(at(2025, 1, 1, 0, 35)), Some(at(2025, 1, 1, 3, 5)));
        assert_eq!(schedule.next_after(at(2025, 1, 1, 6, 35)), Some(at(2025, 1, 2, 0, 5)));

        let schedule: CronSchedule = "10/20 * * * *".parse().unwrap();
        assert_eq!(schedule.next_after(at(2025, 1, 1, 0, 50)), Some(at(2025, 1, 1, 1, 10)));
    }

    #[test]
    fn test_day_fields_use_or_when_both_restricted() {
        // 1st of the month or any Monday
        let schedule: CronSchedule = "0 0 1 * 1".parse().unwrap();
        // 2025-03-01 is a Saturday; next is the Monday after
        assert_eq!(schedule.next_after(at(2025, 3, 1, 0, 0)), Some(at(2025, 3, 3, 0, 0)));
        assert_eq!(schedule.next_after(at(2025, 3, 31, 0, 0)), Some(at(2025, 4, 1, 0, 0)));

        // Only day-of-week restricted: must be a Monday
        let schedule: CronSchedule = "0 0 * * 1".parse().unwrap();
        assert_eq!(schedule.next_after(at(2025, 3, 31, 0, 0)), Some(at(2025, 4, 7, 0, 0)));
    }

    #[test]
    fn test_sunday_is_zero_or_seven() {
        let zero: CronSchedule = "0 3 * * 0".parse().unwrap();
        let seven: CronSchedule = "0 3 * * 7".parse().unwrap();
        let from = at(2025, 3, 10, 0, 0);
        assert_eq!(zero.next_after(from), Some(at(2025, 3, 16, 3, 0)));
        assert_eq!(seven.next_after(from), zero.next_after(from));
        assert_eq!(seven.describe(), "weekly on Sunday at 03:00 UTC");
    }

    #[test]
    fn test_leap_day_and_impossible_dates() {
        let leap: CronSchedule = "0 0 29 2 *".parse().unwrap();
        assert_eq!(leap.next_after(at(2025, 1, 1, 0, 0)), Some(at(2028, 2, 29, 0, 0)));

        let never: CronSchedule = "0 0 30 2 *".parse().unwrap();
        assert_eq!(never.next_after(at(2025, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        for expr in [
            "",
            "0 2 * *",
            "0 2 * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-2 * * * *",
            "a * * * *",
            "1,,2 * * * *",
            "-1 * * * *",
        ] {
            assert!(expr.parse::<CronSchedule>().is_err(), "accepted {:?}", expr);
        }

        let err = "0 2 * *".parse::<CronSchedule>().unwrap_err();
        assert_eq!(err.to_string(), "invalid cron expression '0 2 * *': expected 5 fields, found 4");
    }

    #[test]
    fn test_display_normalizes_whitespace() {
        let schedule: CronSchedule = "  30   4 *  * * ".parse().unwrap();
        assert_eq!(schedule.to_string(), "30 4 * * *");
        assert_eq!(schedule.expression(), "30 4 * * *");
    }

    #[test]
    fn test_describe_shapes() {
        let describe = |s: &str| s.parse::<CronSchedule>().unwrap().describe();
        assert_eq!(describe("* * * * *"), "every minute");
        assert_eq!(describe("*/10 * * * *"), "every 10 minutes");
        assert_eq!(describe("15 * * * *"), "hourly at minute 15");
        assert_eq!(describe("30 4 1 * *"), "monthly on day 1 at 04:30 UTC");
        assert_eq!(describe("0 9-17 * * 1-5"), "cron: 0 9-17 * * 1-5");
    }
}
