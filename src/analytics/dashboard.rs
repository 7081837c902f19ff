use std::collections::HashMap;

use chrono::NaiveDate;
use serde_json::json;
use sqlx::{Row, SqlitePool};

use super::{store_unavailable, CategoryStats, OverviewStats, TrendPoint};
use crate::model::VALIDATION_RANGE;
use crate::op_log::LogScope;
use crate::time::{
    add_days, day_bounds_ms, days_inclusive, ensure_supported, format_date, percentage,
    ratio_percent, today, week_start,
};
use crate::{AppError, AppResult};

/// Longest trend a caller may request.
pub const MAX_TREND_DAYS: u32 = 365;
pub const DEFAULT_TREND_DAYS: u32 = 14;

/// Dashboard figures computed live from current task state.
pub async fn overview(pool: &SqlitePool, user_id: &str) -> AppResult<OverviewStats> {
    overview_at(pool, user_id, today()).await
}

pub async fn overview_at(
    pool: &SqlitePool,
    user_id: &str,
    today: NaiveDate,
) -> AppResult<OverviewStats> {
    let scope = LogScope::new("analytics_overview", Some(user_id));
    let result = overview_live(pool, user_id, today).await;
    scope.finish(result, |stats| {
        json!({ "total": stats.total_tasks, "completion_rate": stats.completion_rate })
    })
}

async fn overview_live(
    pool: &SqlitePool,
    user_id: &str,
    today: NaiveDate,
) -> AppResult<OverviewStats> {
    ensure_supported(today)?;
    let day = format_date(today);
    let (monday_ms, _) = day_bounds_ms(week_start(today));

    let row = sqlx::query(
        "SELECT \
           COUNT(*) AS total, \
           COALESCE(SUM(status = 'completed'), 0) AS completed, \
           COALESCE(SUM(status = 'pending'), 0) AS pending, \
           COALESCE(SUM(status = 'in_progress'), 0) AS in_progress, \
           COALESCE(SUM(status = 'cancelled'), 0) AS cancelled, \
           COALESCE(SUM(due_date IS NOT NULL AND due_date < ?2 \
                        AND status IN ('pending', 'in_progress')), 0) AS overdue, \
           COALESCE(SUM(due_date = ?2), 0) AS due_today, \
           COALESCE(SUM(created_at >= ?3), 0) AS tasks_this_week, \
           COALESCE(SUM(status = 'completed' AND completed_at >= ?3), 0) AS completed_this_week \
         FROM tasks WHERE user_id = ?1",
    )
    .bind(user_id)
    .bind(&day)
    .bind(monday_ms)
    .fetch_one(pool)
    .await
    .map_err(|err| store_unavailable(err, "overview"))?;

    let get = |name: &str| -> AppResult<i64> { row.try_get(name).map_err(AppError::from) };
    let total = get("total")?;
    let completed = get("completed")?;
    let completion_rate = percentage(completed, total);

    Ok(OverviewStats {
        total_tasks: total,
        completed_tasks: completed,
        pending_tasks: get("pending")?,
        in_progress_tasks: get("in_progress")?,
        cancelled_tasks: get("cancelled")?,
        overdue_tasks: get("overdue")?,
        due_today: get("due_today")?,
        tasks_this_week: get("tasks_this_week")?,
        completed_this_week: get("completed_this_week")?,
        completion_rate,
        productivity_score: completion_rate.min(100.0),
    })
}

pub async fn productivity_trend(
    pool: &SqlitePool,
    user_id: &str,
    days: u32,
) -> AppResult<Vec<TrendPoint>> {
    productivity_trend_at(pool, user_id, days, today()).await
}

async fn counts_by_day(
    pool: &SqlitePool,
    sql: &str,
    user_id: &str,
    start_ms: i64,
    end_ms: i64,
    operation: &'static str,
) -> AppResult<HashMap<String, i64>> {
    let rows = sqlx::query(sql)
        .bind(user_id)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(pool)
        .await
        .map_err(|err| store_unavailable(err, operation))?;
    rows.iter()
        .map(|row| -> AppResult<(String, i64)> {
            let day: String = row.try_get("day").map_err(AppError::from)?;
            let count: i64 = row.try_get("n").map_err(AppError::from)?;
            Ok((day, count))
        })
        .collect()
}

/// Day-by-day created/completed counts for the `days` days ending on `today`,
/// oldest first.
///
/// `completion_rate` compares same-day counts and may exceed 100 when older
/// tasks are finished; `productivity_score` is capped at 100.
pub async fn productivity_trend_at(
    pool: &SqlitePool,
    user_id: &str,
    days: u32,
    today: NaiveDate,
) -> AppResult<Vec<TrendPoint>> {
    let scope = LogScope::new("analytics_trend", Some(user_id));
    let result = trend_live(pool, user_id, days, today).await;
    scope.finish(result, |points| json!({ "days": points.len() }))
}

async fn trend_live(
    pool: &SqlitePool,
    user_id: &str,
    days: u32,
    today: NaiveDate,
) -> AppResult<Vec<TrendPoint>> {
    if days == 0 || days > MAX_TREND_DAYS {
        return Err(AppError::new(
            VALIDATION_RANGE,
            format!("Trends cover between 1 and {MAX_TREND_DAYS} days."),
        )
        .with_context("days", days.to_string()));
    }

    let first = add_days(today, 1 - i64::from(days));
    ensure_supported(first)?;
    ensure_supported(today)?;
    let (start_ms, _) = day_bounds_ms(first);
    let (_, end_ms) = day_bounds_ms(today);

    let created = counts_by_day(
        pool,
        "SELECT date(created_at / 1000, 'unixepoch') AS day, COUNT(*) AS n FROM tasks \
         WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3 GROUP BY day",
        user_id,
        start_ms,
        end_ms,
        "trend_created",
    )
    .await?;
    let completed = counts_by_day(
        pool,
        "SELECT date(completed_at / 1000, 'unixepoch') AS day, COUNT(*) AS n FROM tasks \
         WHERE user_id = ?1 AND status = 'completed' \
           AND completed_at >= ?2 AND completed_at < ?3 GROUP BY day",
        user_id,
        start_ms,
        end_ms,
        "trend_completed",
    )
    .await?;

    Ok(days_inclusive(first, today)
        .map(|date| {
            let key = format_date(date);
            let tasks_created = created.get(&key).copied().unwrap_or(0);
            let tasks_completed = completed.get(&key).copied().unwrap_or(0);
            let completion_rate = ratio_percent(tasks_completed, tasks_created);
            TrendPoint {
                date,
                tasks_created,
                tasks_completed,
                completion_rate,
                productivity_score: completion_rate.min(100.0),
            }
        })
        .collect())
}

pub async fn category_stats(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<CategoryStats>> {
    category_stats_at(pool, user_id, today()).await
}

/// Completion figures per category owned by `user_id`, including empty ones.
pub async fn category_stats_at(
    pool: &SqlitePool,
    user_id: &str,
    today: NaiveDate,
) -> AppResult<Vec<CategoryStats>> {
    let scope = LogScope::new("analytics_category_stats", Some(user_id));
    let result = category_stats_live(pool, user_id, today).await;
    scope.finish(result, |stats| json!({ "categories": stats.len() }))
}

async fn category_stats_live(
    pool: &SqlitePool,
    user_id: &str,
    today: NaiveDate,
) -> AppResult<Vec<CategoryStats>> {
    ensure_supported(today)?;
    let rows = sqlx::query(
        "SELECT c.id, c.name, c.color, \
           COUNT(t.id) AS total, \
           COALESCE(SUM(t.status = 'completed'), 0) AS completed, \
           COALESCE(SUM(t.status = 'pending'), 0) AS pending, \
           COALESCE(SUM(t.due_date IS NOT NULL AND t.due_date < ?2 \
                        AND t.status IN ('pending', 'in_progress')), 0) AS overdue \
         FROM categories c \
         LEFT JOIN tasks t ON t.category_id = c.id AND t.user_id = c.user_id \
         WHERE c.user_id = ?1 \
         GROUP BY c.id, c.name, c.color \
         ORDER BY c.name COLLATE NOCASE, c.id",
    )
    .bind(user_id)
    .bind(format_date(today))
    .fetch_all(pool)
    .await
    .map_err(|err| store_unavailable(err, "category_stats"))?;

    rows.iter()
        .map(|row| -> AppResult<CategoryStats> {
            let total: i64 = row.try_get("total").map_err(AppError::from)?;
            let completed: i64 = row.try_get("completed").map_err(AppError::from)?;
            Ok(CategoryStats {
                category_id: row.try_get("id").map_err(AppError::from)?,
                category_name: row.try_get("name").map_err(AppError::from)?,
                category_color: row.try_get("color").map_err(AppError::from)?,
                total_tasks: total,
                completed_tasks: completed,
                pending_tasks: row.try_get("pending").map_err(AppError::from)?,
                overdue_tasks: row.try_get("overdue").map_err(AppError::from)?,
                completion_rate: percentage(completed, total),
            })
        })
        .collect()
}
