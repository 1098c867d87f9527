//! Five-field cron expressions.
//!
//! `minute hour day-of-month month day-of-week`, with `*`, lists (`1,5`),
//! ranges (`1-5`), and steps (`*/2`, `10-40/5`). Weekday 0–6 runs
//! Sunday–Saturday; month and weekday names are accepted
//! case-insensitively (`jan`, `mon`). Following long-standing cron
//! behavior, when both day-of-month and day-of-week are restricted a
//! date matches if either field matches.
//!
//! Expressions are evaluated against civil time in the scheduler's
//! configured timezone; the scheduler, not this module, owns the
//! once-per-civil-minute rule across DST transitions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use thiserror::Error;

/// Error produced when a cron expression does not parse.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid cron expression \"{expression}\": {detail}")]
pub struct CronParseError {
    /// The rejected expression.
    pub expression: String,
    /// What was wrong with it.
    pub detail: String,
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// One parsed field: the set of admitted values, plus whether the field
/// was written as `*` (needed for the day-of-month/day-of-week rule).
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u8>,
    is_wildcard: bool,
}

impl CronField {
    fn contains(&self, value: u8) -> bool {
        self.values.contains(&value)
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    /// The expression as written.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the expression matches the civil minute of `at`.
    ///
    /// Seconds are ignored; callers pass an instant inside the minute
    /// they are evaluating.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let minute = at.minute() as u8;
        let hour = at.hour() as u8;
        let dom = at.day() as u8;
        let month = at.month() as u8;
        let dow = at.weekday().num_days_from_sunday() as u8;

        if !self.minute.contains(minute)
            || !self.hour.contains(hour)
            || !self.month.contains(month)
        {
            return false;
        }

        // Standard rule: with both date fields restricted, either may match.
        match (self.day_of_month.is_wildcard, self.day_of_week.is_wildcard) {
            (true, true) => true,
            (false, true) => self.day_of_month.contains(dom),
            (true, false) => self.day_of_week.contains(dow),
            (false, false) => self.day_of_month.contains(dom) || self.day_of_week.contains(dow),
        }
    }
}

impl FromStr for CronExpr {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |detail: String| CronParseError {
            expression: s.to_owned(),
            detail,
        };

        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(err(format!("expected 5 fields, got {}", fields.len())));
        }

        let minute = parse_field(fields[0], 0, 59, None).map_err(&err)?;
        let hour = parse_field(fields[1], 0, 23, None).map_err(&err)?;
        let day_of_month = parse_field(fields[2], 1, 31, None).map_err(&err)?;
        let month = parse_field(fields[3], 1, 12, Some(&MONTH_NAMES)).map_err(&err)?;
        let day_of_week = parse_field(fields[4], 0, 6, Some(&DOW_NAMES)).map_err(&err)?;

        Ok(Self {
            source: s.to_owned(),
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }
}

/// Parse one field over `[min, max]`, optionally with symbolic names whose
/// index (plus `min` offset for months) maps to the numeric value.
fn parse_field(
    field: &str,
    min: u8,
    max: u8,
    names: Option<&[&str]>,
) -> Result<CronField, String> {
    let mut values = BTreeSet::new();

    for term in field.split(',') {
        if term.is_empty() {
            return Err("empty list term".to_owned());
        }

        let (spec, step) = match term.split_once('/') {
            Some((spec, step_str)) => {
                let step: u8 = step_str
                    .parse()
                    .map_err(|_| format!("bad step \"{step_str}\""))?;
                if step == 0 {
                    return Err("step must be > 0".to_owned());
                }
                (spec, step)
            }
            None => (term, 1),
        };

        let (lo, hi) = if spec == "*" {
            (min, max)
        } else {
            match spec.split_once('-') {
                Some((a, b)) => (parse_value(a, min, max, names)?, parse_value(b, min, max, names)?),
                // A single value with a step means "from value to max".
                None if step > 1 => (parse_value(spec, min, max, names)?, max),
                None => {
                    let v = parse_value(spec, min, max, names)?;
                    (v, v)
                }
            }
        };

        if lo > hi {
            return Err(format!("range {lo}-{hi} is inverted"));
        }

        let mut v = lo;
        loop {
            values.insert(v);
            match v.checked_add(step) {
                Some(next) if next <= hi => v = next,
                _ => break,
            }
        }
    }

    // The dom/dow either-rule only treats a bare `*` as unrestricted.
    Ok(CronField {
        values,
        is_wildcard: field == "*",
    })
}

fn parse_value(text: &str, min: u8, max: u8, names: Option<&[&str]>) -> Result<u8, String> {
    if let Some(names) = names {
        let lower = text.to_ascii_lowercase();
        if let Some(index) = names.iter().position(|n| *n == lower) {
            // Names index from the field minimum (months are 1-based).
            #[allow(clippy::cast_possible_truncation)]
            return Ok(min + index as u8);
        }
    }
    let value: u8 = text.parse().map_err(|_| format!("bad value \"{text}\""))?;
    if value < min || value > max {
        return Err(format!("value {value} outside {min}-{max}"));
    }
    Ok(value)
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl serde::Serialize for CronExpr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> serde::Deserialize<'de> for CronExpr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_minute() {
        let expr: CronExpr = "* * * * *".parse().unwrap();
        assert!(expr.matches(&at(2024, 6, 3, 14, 30)));
        assert!(expr.matches(&at(2024, 12, 31, 23, 59)));
    }

    #[test]
    fn test_step_minutes() {
        let expr: CronExpr = "*/2 * * * *".parse().unwrap();
        assert!(expr.matches(&at(2024, 6, 3, 14, 30)));
        assert!(!expr.matches(&at(2024, 6, 3, 14, 31)));
        assert!(expr.matches(&at(2024, 6, 3, 14, 32)));
    }

    #[test]
    fn test_lists_and_ranges() {
        let expr: CronExpr = "1,5 9-17 * * *".parse().unwrap();
        assert!(expr.matches(&at(2024, 6, 3, 9, 1)));
        assert!(expr.matches(&at(2024, 6, 3, 17, 5)));
        assert!(!expr.matches(&at(2024, 6, 3, 8, 1)));
        assert!(!expr.matches(&at(2024, 6, 3, 9, 2)));
    }

    #[test]
    fn test_range_with_step() {
        let expr: CronExpr = "10-40/15 * * * *".parse().unwrap();
        for minute in [10u32, 25, 40] {
            assert!(expr.matches(&at(2024, 6, 3, 0, minute)));
        }
        assert!(!expr.matches(&at(2024, 6, 3, 0, 55)));
    }

    #[test]
    fn test_weekday_zero_is_sunday() {
        let expr: CronExpr = "0 0 * * 0".parse().unwrap();
        // 2024-06-02 was a Sunday.
        assert!(expr.matches(&at(2024, 6, 2, 0, 0)));
        assert!(!expr.matches(&at(2024, 6, 3, 0, 0)));
    }

    #[test]
    fn test_names() {
        let expr: CronExpr = "0 9 * jan mon".parse().unwrap();
        // 2024-01-01 was a Monday.
        assert!(expr.matches(&at(2024, 1, 1, 9, 0)));
        assert!(!expr.matches(&at(2024, 2, 5, 9, 0)));
    }

    #[test]
    fn test_dom_dow_either_rule() {
        // Both restricted: the 13th of any month OR any Friday.
        let expr: CronExpr = "0 0 13 * fri".parse().unwrap();
        // 2024-09-13 was a Friday (both match).
        assert!(expr.matches(&at(2024, 9, 13, 0, 0)));
        // 2024-06-13 was a Thursday (dom matches).
        assert!(expr.matches(&at(2024, 6, 13, 0, 0)));
        // 2024-06-14 was a Friday (dow matches).
        assert!(expr.matches(&at(2024, 6, 14, 0, 0)));
        // 2024-06-12 was a Wednesday (neither).
        assert!(!expr.matches(&at(2024, 6, 12, 0, 0)));
    }

    #[test]
    fn test_parse_errors() {
        assert!("* * * *".parse::<CronExpr>().is_err());
        assert!("60 * * * *".parse::<CronExpr>().is_err());
        assert!("* * 0 * *".parse::<CronExpr>().is_err());
        assert!("*/0 * * * *".parse::<CronExpr>().is_err());
        assert!("5-1 * * * *".parse::<CronExpr>().is_err());
        assert!("* * * * funday".parse::<CronExpr>().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let expr: CronExpr = "*/5 2 * * 1-5".parse().unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        let back: CronExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
        assert_eq!(back.source(), "*/5 2 * * 1-5");
    }
}
