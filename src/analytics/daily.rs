use chrono::NaiveDate;
use serde_json::json;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

use super::{
    decode_json, parse_stored_date, store_unavailable, validate_range, CategoryBreakdown,
    DailyStats,
};
use crate::db::BEGIN_IMMEDIATE;
use crate::id::new_uuid_v7;
use crate::op_log::LogScope;
use crate::time::{day_bounds_ms, days_inclusive, format_date, now_ms, percentage};
use crate::{AppError, AppResult};

const DAILY_COLUMNS: &str = "id, user_id, date, tasks_created, tasks_completed, tasks_overdue, \
     focus_minutes, categories, created_at, updated_at";

/// Counts for one (user, date), read from the live task store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DayCounts {
    pub date: NaiveDate,
    pub created: i64,
    pub completed: i64,
    pub overdue: i64,
    pub focus_minutes: Option<i64>,
    pub categories: Vec<CategoryBreakdown>,
}

pub(crate) async fn gather_day(
    conn: &mut SqliteConnection,
    user_id: &str,
    date: NaiveDate,
) -> Result<DayCounts, sqlx::Error> {
    let (start, end) = day_bounds_ms(date);
    let day = format_date(date);

    let row = sqlx::query(
        "SELECT \
           COALESCE(SUM(CASE WHEN created_at >= ?2 AND created_at < ?3 THEN 1 ELSE 0 END), 0) AS created, \
           COALESCE(SUM(CASE WHEN status = 'completed' AND completed_at >= ?2 AND completed_at < ?3 \
                             THEN 1 ELSE 0 END), 0) AS completed, \
           COALESCE(SUM(CASE WHEN due_date IS NOT NULL AND due_date < ?4 \
                              AND status IN ('pending', 'in_progress') THEN 1 ELSE 0 END), 0) AS overdue, \
           SUM(CASE WHEN status = 'completed' AND completed_at >= ?2 AND completed_at < ?3 \
                    THEN actual_minutes END) AS focus_minutes \
         FROM tasks WHERE user_id = ?1",
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .bind(&day)
    .fetch_one(&mut *conn)
    .await?;

    let categories = sqlx::query(
        "SELECT c.id AS category_id, c.name, c.color, \
           SUM(CASE WHEN t.created_at >= ?2 AND t.created_at < ?3 THEN 1 ELSE 0 END) AS tasks_created, \
           SUM(CASE WHEN t.status = 'completed' AND t.completed_at >= ?2 AND t.completed_at < ?3 \
                    THEN 1 ELSE 0 END) AS tasks_completed \
         FROM tasks t JOIN categories c ON c.id = t.category_id \
         WHERE t.user_id = ?1 AND c.user_id = ?1 \
         GROUP BY c.id, c.name, c.color \
         HAVING tasks_created > 0 OR tasks_completed > 0 \
         ORDER BY c.name COLLATE NOCASE, c.id",
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| -> Result<CategoryBreakdown, sqlx::Error> {
        Ok(CategoryBreakdown {
            category_id: row.try_get("category_id")?,
            name: row.try_get("name")?,
            color: row.try_get("color")?,
            tasks_created: row.try_get("tasks_created")?,
            tasks_completed: row.try_get("tasks_completed")?,
        })
    })
    .collect::<Result<Vec<_>, _>>()?;

    Ok(DayCounts {
        date,
        created: row.try_get("created")?,
        completed: row.try_get("completed")?,
        overdue: row.try_get("overdue")?,
        focus_minutes: row.try_get("focus_minutes")?,
        categories,
    })
}

pub(crate) async fn gather_days(
    pool: &SqlitePool,
    user_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<Vec<DayCounts>> {
    // One read transaction so every day sees the same snapshot.
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| store_unavailable(err, "daily_gather_begin"))?;
    let mut days = Vec::new();
    for date in days_inclusive(start, end) {
        let counts = gather_day(&mut tx, user_id, date)
            .await
            .map_err(|err| store_unavailable(err, "daily_gather"))?;
        days.push(counts);
    }
    tx.rollback()
        .await
        .map_err(|err| store_unavailable(err, "daily_gather_end"))?;
    Ok(days)
}

fn deserialize_daily(row: SqliteRow) -> AppResult<DailyStats> {
    let date: String = row.try_get("date").map_err(AppError::from)?;
    let categories: String = row.try_get("categories").map_err(AppError::from)?;
    let tasks_created: i64 = row.try_get("tasks_created").map_err(AppError::from)?;
    let tasks_completed: i64 = row.try_get("tasks_completed").map_err(AppError::from)?;
    Ok(DailyStats {
        id: row.try_get("id").map_err(AppError::from)?,
        user_id: row.try_get("user_id").map_err(AppError::from)?,
        date: parse_stored_date(&date, "date")?,
        tasks_created,
        tasks_completed,
        tasks_overdue: row.try_get("tasks_overdue").map_err(AppError::from)?,
        focus_minutes: row.try_get("focus_minutes").map_err(AppError::from)?,
        completion_rate: percentage(tasks_completed, tasks_created),
        categories: decode_json(&categories, "categories")?,
        created_at: row.try_get("created_at").map_err(AppError::from)?,
        updated_at: row.try_get("updated_at").map_err(AppError::from)?,
    })
}

async fn upsert_day(
    conn: &mut SqliteConnection,
    user_id: &str,
    counts: &DayCounts,
    categories_json: &str,
    now: i64,
) -> Result<SqliteRow, sqlx::Error> {
    let day = format_date(counts.date);
    sqlx::query(
        "INSERT INTO daily_stats \
         (id, user_id, date, tasks_created, tasks_completed, tasks_overdue, focus_minutes, \
          categories, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
         ON CONFLICT(user_id, date) DO UPDATE SET \
           tasks_created = excluded.tasks_created, \
           tasks_completed = excluded.tasks_completed, \
           tasks_overdue = excluded.tasks_overdue, \
           focus_minutes = excluded.focus_minutes, \
           categories = excluded.categories, \
           updated_at = excluded.updated_at",
    )
    .bind(new_uuid_v7())
    .bind(user_id)
    .bind(&day)
    .bind(counts.created)
    .bind(counts.completed)
    .bind(counts.overdue)
    .bind(counts.focus_minutes)
    .bind(categories_json)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!(
        "SELECT {DAILY_COLUMNS} FROM daily_stats WHERE user_id = ? AND date = ?"
    ))
    .bind(user_id)
    .bind(&day)
    .fetch_one(&mut *conn)
    .await
}

/// Recomputes and overwrites the daily rollups for every date in `start..=end`.
///
/// All dates are gathered first and then written in one transaction: either
/// every row in the range is replaced or none is.
pub async fn recompute_daily_range(
    pool: &SqlitePool,
    user_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<Vec<DailyStats>> {
    let scope = LogScope::new("analytics_recompute_daily", Some(user_id));
    let result: AppResult<_> = async {
        validate_range(start, end)?;
        let days = gather_days(pool, user_id, start, end).await?;

        let encoded = days
            .iter()
            .map(|day| serde_json::to_string(&day.categories).map_err(AppError::from))
            .collect::<AppResult<Vec<_>>>()?;

        let now = now_ms();
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| store_unavailable(err, "daily_write_begin"))?;
        let mut rows = Vec::with_capacity(days.len());
        for (counts, categories_json) in days.iter().zip(&encoded) {
            let row = upsert_day(&mut tx, user_id, counts, categories_json, now)
                .await
                .map_err(|err| store_unavailable(err, "daily_write"))?;
            rows.push(row);
        }
        tx.commit()
            .await
            .map_err(|err| store_unavailable(err, "daily_write_commit"))?;

        rows.into_iter().map(deserialize_daily).collect()
    }
    .await;
    scope.finish(result, |rows: &Vec<DailyStats>| {
        json!({
            "start": format_date(start),
            "end": format_date(end),
            "days": rows.len(),
        })
    })
}

pub async fn recompute_daily(
    pool: &SqlitePool,
    user_id: &str,
    date: NaiveDate,
) -> AppResult<DailyStats> {
    recompute_daily_range(pool, user_id, date, date)
        .await?
        .pop()
        .ok_or_else(|| AppError::new(crate::db::STORE_FAILURE, "Daily rollup was not written."))
}

/// Stored rollups for `start..=end`, oldest first. Dates never recomputed are absent.
pub async fn list_daily_stats(
    pool: &SqlitePool,
    user_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<Vec<DailyStats>> {
    let scope = LogScope::new("analytics_list_daily", Some(user_id));
    let result: AppResult<_> = async {
        validate_range(start, end)?;
        let rows = sqlx::query(&format!(
            "SELECT {DAILY_COLUMNS} FROM daily_stats \
             WHERE user_id = ? AND date >= ? AND date <= ? ORDER BY date"
        ))
        .bind(user_id)
        .bind(format_date(start))
        .bind(format_date(end))
        .fetch_all(pool)
        .await
        .map_err(|err| store_unavailable(err, "daily_list"))?;
        rows.into_iter().map(deserialize_daily).collect()
    }
    .await;
    scope.finish(result, |rows: &Vec<DailyStats>| json!({ "rows": rows.len() }))
}
