//! Daily and weekly rollups plus the live dashboard figures.
//!
//! Rollups are derived data: they are recomputed from the task store and
//! overwritten in place, so running a recomputation twice (or concurrently)
//! converges on the same stored values. Counts are gathered before any write
//! and every write batch commits as one transaction; a storage failure
//! surfaces as `ANALYTICS/STORE_UNAVAILABLE` and leaves earlier rollups intact.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{ANALYTICS_STORE_UNAVAILABLE, DECODE_ERROR, VALIDATION_RANGE};
use crate::AppError;

pub mod daily;
pub mod dashboard;
pub mod retention;
pub mod weekly;

pub use daily::{list_daily_stats, recompute_daily, recompute_daily_range};
pub use dashboard::{
    category_stats, category_stats_at, overview, overview_at, productivity_trend,
    productivity_trend_at,
};
pub use weekly::{list_weekly_stats, recompute_weekly};

/// Longest span a single range request may cover.
pub const MAX_RANGE_DAYS: i64 = 366;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub category_id: String,
    pub name: String,
    pub color: String,
    pub tasks_created: i64,
    pub tasks_completed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub tasks_created: i64,
    pub tasks_completed: i64,
    /// Open tasks due before `date`, as of the last recomputation.
    pub tasks_overdue: i64,
    pub focus_minutes: Option<i64>,
    pub completion_rate: f64,
    pub categories: Vec<CategoryBreakdown>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayBreakdown {
    pub date: NaiveDate,
    pub tasks_created: i64,
    pub tasks_completed: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyStats {
    pub id: String,
    pub user_id: String,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub iso_year: i32,
    pub iso_week: u32,
    pub tasks_created: i64,
    pub tasks_completed: i64,
    pub tasks_overdue: i64,
    pub completion_rate: f64,
    pub most_productive_day: Option<String>,
    pub average_tasks_per_day: f64,
    pub daily_breakdown: Vec<DayBreakdown>,
    pub categories: Vec<CategoryBreakdown>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
    pub cancelled_tasks: i64,
    pub overdue_tasks: i64,
    pub due_today: i64,
    pub tasks_this_week: i64,
    pub completed_this_week: i64,
    pub completion_rate: f64,
    pub productivity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub tasks_created: i64,
    pub tasks_completed: i64,
    pub completion_rate: f64,
    pub productivity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category_id: String,
    pub category_name: String,
    pub category_color: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub overdue_tasks: i64,
    pub completion_rate: f64,
}

/// Storage failure while aggregating; nothing was written.
pub(crate) fn store_unavailable(err: sqlx::Error, operation: &'static str) -> AppError {
    AppError::new(
        ANALYTICS_STORE_UNAVAILABLE,
        "Analytics could not reach the task store. Existing rollups were left unchanged.",
    )
    .with_context("operation", operation)
    .with_cause(AppError::from(err))
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    column: &'static str,
) -> Result<T, AppError> {
    serde_json::from_str(raw).map_err(|err| {
        AppError::new(DECODE_ERROR, format!("Stored rollup has invalid {column}."))
            .with_context("column", column)
            .with_cause(AppError::from(err))
    })
}

pub(crate) fn parse_stored_date(raw: &str, column: &'static str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, crate::time::DATE_FORMAT).map_err(|err| {
        AppError::new(DECODE_ERROR, format!("Stored rollup has invalid {column}."))
            .with_context("column", column)
            .with_context("value", raw.to_string())
            .with_context("error", err.to_string())
    })
}

/// Rejects reversed ranges, spans over [`MAX_RANGE_DAYS`] and dates outside
/// the storable calendar.
pub(crate) fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), AppError> {
    crate::time::ensure_supported(start)?;
    crate::time::ensure_supported(end)?;
    let span = (end - start).num_days();
    if span < 0 {
        return Err(AppError::new(VALIDATION_RANGE, "The range ends before it starts.")
            .with_context("start", crate::time::format_date(start))
            .with_context("end", crate::time::format_date(end)));
    }
    if span >= MAX_RANGE_DAYS {
        return Err(AppError::new(
            VALIDATION_RANGE,
            format!("Ranges may cover at most {MAX_RANGE_DAYS} days."),
        )
        .with_context("days", (span + 1).to_string()));
    }
    Ok(())
}
