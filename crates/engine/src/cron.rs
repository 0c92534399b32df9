//! Cron next-fire computation for schedule triggers.
//!
//! Supports the classic five-field form `minute hour day-of-month month
//! day-of-week`, where each field is `*`, `*/N`, or a literal number.
//! Fire times are computed in UTC by scanning forward minute-aligned
//! instants; the scan is bounded so a never-matching expression yields
//! `None` instead of looping forever.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

const SCAN_LIMIT_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Any,
    Step(u32),
    Exact(u32),
}

impl Field {
    fn matches(self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Step(n) => n != 0 && value % n == 0,
            Field::Exact(n) => value == n,
        }
    }
}

fn parse_field(raw: &str, max: u32) -> Option<Field> {
    if raw == "*" {
        return Some(Field::Any);
    }
    if let Some(step) = raw.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some(Field::Step(n));
    }
    let n: u32 = raw.parse().ok()?;
    if n > max {
        return None;
    }
    Some(Field::Exact(n))
}

struct Schedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

fn parse(expr: &str) -> Option<Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    Some(Schedule {
        minute: parse_field(fields[0], 59)?,
        hour: parse_field(fields[1], 23)?,
        day_of_month: parse_field(fields[2], 31)?,
        month: parse_field(fields[3], 12)?,
        day_of_week: parse_field(fields[4], 6)?,
    })
}

impl Schedule {
    fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }
}

/// The first instant strictly after `after` that matches `expr`, or
/// `None` when the expression is malformed or never fires within a year.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = parse(expr)?;

    // Align to the next whole minute.
    let mut candidate = Utc
        .with_ymd_and_hms(
            after.year(),
            after.month(),
            after.day(),
            after.hour(),
            after.minute(),
            0,
        )
        .single()?
        + Duration::minutes(1);

    for _ in 0..SCAN_LIMIT_MINUTES {
        if schedule.matches(candidate) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_minute() {
        let after = at(2024, 6, 12, 10, 30);
        assert_eq!(next_fire("* * * * *", after), Some(at(2024, 6, 12, 10, 31)));
    }

    #[test]
    fn test_daily_at_nine() {
        // Before 09:00 fires same day, after fires next day.
        assert_eq!(
            next_fire("0 9 * * *", at(2024, 6, 12, 7, 0)),
            Some(at(2024, 6, 12, 9, 0))
        );
        assert_eq!(
            next_fire("0 9 * * *", at(2024, 6, 12, 9, 0)),
            Some(at(2024, 6, 13, 9, 0))
        );
    }

    #[test]
    fn test_step_minutes() {
        assert_eq!(
            next_fire("*/15 * * * *", at(2024, 6, 12, 10, 31)),
            Some(at(2024, 6, 12, 10, 45))
        );
    }

    #[test]
    fn test_weekly_monday_morning() {
        // 2024-06-12 is a Wednesday; day-of-week 1 is Monday.
        assert_eq!(
            next_fire("30 8 * * 1", at(2024, 6, 12, 0, 0)),
            Some(at(2024, 6, 17, 8, 30))
        );
    }

    #[test]
    fn test_monthly_first_day() {
        assert_eq!(
            next_fire("0 0 1 * *", at(2024, 6, 12, 0, 0)),
            Some(at(2024, 7, 1, 0, 0))
        );
    }

    #[test]
    fn test_malformed_expressions() {
        let after = at(2024, 6, 12, 0, 0);
        assert_eq!(next_fire("", after), None);
        assert_eq!(next_fire("* * * *", after), None);
        assert_eq!(next_fire("61 * * * *", after), None);
        assert_eq!(next_fire("*/0 * * * *", after), None);
        assert_eq!(next_fire("a b c d e", after), None);
    }

    #[test]
    fn test_never_matching_is_none() {
        // February 31st never exists.
        assert_eq!(next_fire("0 0 31 2 *", at(2024, 1, 1, 0, 0)), None);
    }
}
