//! Gregorian calendar helpers.
//!
//! Month arithmetic goes through a flat month index (`year * 12 + month0`) so
//! that the target day is clamped against the target month only, never
//! carried over from an intermediate month.

use chrono::{Datelike, Days, NaiveDate, Weekday};

/// Unit used by [`add_interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarUnit {
    Day,
    Week,
    Month,
    Year,
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in `month` (1-12). Returns 0 for an invalid month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// `min(day, days_in_month(year, month))`.
pub fn clamp_day_of_month(year: i32, month: u32, day: u32) -> u32 {
    day.min(days_in_month(year, month))
}

/// The date for `day` in the given month, clamped to the month's last day.
pub fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, clamp_day_of_month(year, month, day.max(1)))
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Flat month index of a date: `year * 12 + (month - 1)`.
pub fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}

/// Inverse of [`month_index`], as `(year, month)` with month in 1-12.
pub fn year_month(index: i64) -> Option<(i32, u32)> {
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    Some((year, index.rem_euclid(12) as u32 + 1))
}

/// Date for `day` (clamped) in the month `index` months from year 0.
pub fn clamped_date_at(index: i64, day: u32) -> Option<NaiveDate> {
    let (year, month) = year_month(index)?;
    clamped_date(year, month, day)
}

/// Add `n` calendar units to `date`.
///
/// Month and year additions keep the day of month, clamped to the length of
/// the resulting month: Jan 31 + 1 month is Feb 28/29.
pub fn add_interval(date: NaiveDate, unit: CalendarUnit, n: u32) -> Option<NaiveDate> {
    match unit {
        CalendarUnit::Day => date.checked_add_days(Days::new(n as u64)),
        CalendarUnit::Week => date.checked_add_days(Days::new(n as u64 * 7)),
        CalendarUnit::Month => clamped_date_at(month_index(date) + n as i64, date.day()),
        CalendarUnit::Year => clamped_date_at(month_index(date) + n as i64 * 12, date.day()),
    }
}

/// Weekday from a 0-6 index where 0 is Sunday.
pub fn weekday_from_index(index: u32) -> Option<Weekday> {
    Some(match index {
        0 => Weekday::Sun,
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        6 => Weekday::Sat,
        _ => return None,
    })
}
