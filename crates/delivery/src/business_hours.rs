//! Business-hours window arithmetic for delay adjustment.
//!
//! Windows apply on weekdays in the user's local time; a resume time that
//! already falls inside the window is returned unchanged.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Offset, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl BusinessHours {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    /// Whether `local` falls inside the window on a weekday. Handles
    /// windows that wrap past midnight (start > end).
    fn is_open(&self, local: &DateTime<FixedOffset>) -> bool {
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let hour = local.hour();
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    /// The earliest instant at or after `at` that falls inside the
    /// window, computed in the timezone `tz_offset_minutes` east of UTC.
    pub fn next_open(&self, at: DateTime<Utc>, tz_offset_minutes: i32) -> DateTime<Utc> {
        let offset = FixedOffset::east_opt(tz_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        let local = at.with_timezone(&offset);
        if self.is_open(&local) {
            return at;
        }

        // Scan hour boundaries; two weeks covers any weekend plus a
        // degenerate window.
        let mut candidate = local
            .with_minute(0)
            .and_then(|c| c.with_second(0))
            .and_then(|c| c.with_nanosecond(0))
            .unwrap_or(local)
            + Duration::hours(1);
        for _ in 0..(14 * 24) {
            if self.is_open(&candidate) {
                return candidate.with_timezone(&Utc);
            }
            candidate += Duration::hours(1);
        }
        at
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 17,
        }
    }
}
