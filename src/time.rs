use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};

use crate::model::VALIDATION_RANGE;
use crate::{AppError, AppResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const MS_PER_DAY: i64 = 86_400_000;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_date(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Calendar date (UTC) of the current instant.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Half-open `[start, end)` millisecond window covering `date` in UTC.
pub fn day_bounds_ms(date: NaiveDate) -> (i64, i64) {
    let start = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    (start, start + MS_PER_DAY)
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

/// Dates outside `0001-01-01..=9999-12-31` cannot be stored as `YYYY-MM-DD`.
#[allow(clippy::result_large_err)]
pub fn ensure_supported(date: NaiveDate) -> AppResult<()> {
    if (1..=9999).contains(&date.year()) {
        return Ok(());
    }
    Err(
        AppError::new(VALIDATION_RANGE, "Dates must fall between years 1 and 9999.")
            .with_context("date", date.to_string()),
    )
}

/// Every date in `start..=end`, stopping at the end of the calendar.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    std::iter::successors(Some(start), NaiveDate::succ_opt).take_while(move |date| *date <= end)
}

/// Shifts `date` by `days`, saturating at the calendar bounds.
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[allow(clippy::result_large_err)]
pub fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|err| {
        AppError::new("VALIDATION/DATE", "Dates must use YYYY-MM-DD format.")
            .with_context("value", value.to_string())
            .with_context("error", err.to_string())
    })
}

/// Rounds a percentage to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `part / whole * 100` rounded to one decimal, `0.0` for an empty whole.
/// Not clamped: a day can complete more tasks than it created.
pub fn ratio_percent(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    round1(part as f64 / whole as f64 * 100.0)
}

/// [`ratio_percent`] clamped to `[0, 100]`.
pub fn percentage(part: i64, whole: i64) -> f64 {
    ratio_percent(part, whole).clamp(0.0, 100.0)
}
