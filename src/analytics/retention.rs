use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;

use super::store_unavailable;
use crate::db::BEGIN_IMMEDIATE;
use crate::model::VALIDATION_RANGE;
use crate::op_log::LogScope;
use crate::time::{add_days, format_date};
use crate::{AppError, AppResult};

pub const DEFAULT_KEEP_DAYS: u32 = 90;
pub const DEFAULT_KEEP_WEEKS: u32 = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_days: u32,
    pub keep_weeks: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_days: DEFAULT_KEEP_DAYS,
            keep_weeks: DEFAULT_KEEP_WEEKS,
        }
    }
}

impl RetentionPolicy {
    /// Daily rollups dated before this are expired.
    pub fn daily_cutoff(&self, today: NaiveDate) -> NaiveDate {
        add_days(today, -i64::from(self.keep_days))
    }

    /// Weekly rollups starting before this are expired.
    pub fn weekly_cutoff(&self, today: NaiveDate) -> NaiveDate {
        add_days(today, -7 * i64::from(self.keep_weeks))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub daily_cutoff: NaiveDate,
    pub weekly_cutoff: NaiveDate,
    pub daily_rows: u64,
    pub weekly_rows: u64,
    pub dry_run: bool,
}

/// Deletes expired rollups for every user. With `dry_run` the rows are only counted.
pub async fn cleanup(
    pool: &SqlitePool,
    policy: RetentionPolicy,
    today: NaiveDate,
    dry_run: bool,
) -> AppResult<CleanupReport> {
    let scope = LogScope::new("analytics_cleanup", None);
    let result: AppResult<_> = async {
        if policy.keep_days == 0 || policy.keep_weeks == 0 {
            return Err(AppError::new(
                VALIDATION_RANGE,
                "Retention must keep at least one day and one week.",
            )
            .with_context("days", policy.keep_days.to_string())
            .with_context("weeks", policy.keep_weeks.to_string()));
        }
        let daily_cutoff = policy.daily_cutoff(today);
        let weekly_cutoff = policy.weekly_cutoff(today);

        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| store_unavailable(err, "cleanup_begin"))?;

        let (daily_rows, weekly_rows) = if dry_run {
            let daily: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_stats WHERE date < ?")
                .bind(format_date(daily_cutoff))
                .fetch_one(&mut *tx)
                .await
                .map_err(|err| store_unavailable(err, "cleanup_count_daily"))?;
            let weekly: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM weekly_stats WHERE week_start < ?")
                    .bind(format_date(weekly_cutoff))
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|err| store_unavailable(err, "cleanup_count_weekly"))?;
            (daily.max(0) as u64, weekly.max(0) as u64)
        } else {
            let daily = sqlx::query("DELETE FROM daily_stats WHERE date < ?")
                .bind(format_date(daily_cutoff))
                .execute(&mut *tx)
                .await
                .map_err(|err| store_unavailable(err, "cleanup_delete_daily"))?
                .rows_affected();
            let weekly = sqlx::query("DELETE FROM weekly_stats WHERE week_start < ?")
                .bind(format_date(weekly_cutoff))
                .execute(&mut *tx)
                .await
                .map_err(|err| store_unavailable(err, "cleanup_delete_weekly"))?
                .rows_affected();
            (daily, weekly)
        };

        tx.commit()
            .await
            .map_err(|err| store_unavailable(err, "cleanup_commit"))?;

        Ok(CleanupReport {
            daily_cutoff,
            weekly_cutoff,
            daily_rows,
            weekly_rows,
            dry_run,
        })
    }
    .await;
    scope.finish(result, |report| {
        json!({
            "daily_rows": report.daily_rows,
            "weekly_rows": report.weekly_rows,
            "dry_run": report.dry_run,
        })
    })
}
