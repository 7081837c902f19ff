use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde_json::json;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use super::daily::{gather_days, DayCounts};
use super::{
    decode_json, parse_stored_date, store_unavailable, validate_range, CategoryBreakdown,
    DayBreakdown, WeeklyStats,
};
use crate::db::BEGIN_IMMEDIATE;
use crate::id::new_uuid_v7;
use crate::op_log::LogScope;
use crate::time::{add_days, ensure_supported, format_date, now_ms, percentage, week_start};
use crate::{AppError, AppResult};

const WEEKLY_COLUMNS: &str = "id, user_id, week_start, week_end, iso_year, iso_week, \
     tasks_created, tasks_completed, tasks_overdue, completion_rate, most_productive_day, \
     average_tasks_per_day, daily_breakdown, categories, created_at, updated_at";

/// Weekly figures before they are stored.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WeekSummary {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub iso_year: i32,
    pub iso_week: u32,
    pub created: i64,
    pub completed: i64,
    pub overdue: i64,
    pub completion_rate: f64,
    pub most_productive_day: Option<String>,
    pub average_tasks_per_day: f64,
    pub daily_breakdown: Vec<DayBreakdown>,
    pub categories: Vec<CategoryBreakdown>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Weekday with the most completions; the earliest day wins a tie.
fn most_productive_day(days: &[DayCounts]) -> Option<String> {
    let mut best: Option<&DayCounts> = None;
    for day in days {
        if day.completed > best.map_or(0, |b| b.completed) {
            best = Some(day);
        }
    }
    best.map(|day| day.date.format("%A").to_string())
}

fn merge_categories(days: &[DayCounts]) -> Vec<CategoryBreakdown> {
    let mut merged: Vec<CategoryBreakdown> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in days.iter().flat_map(|day| day.categories.iter()) {
        match index.get(&entry.category_id) {
            Some(&at) => {
                merged[at].tasks_created += entry.tasks_created;
                merged[at].tasks_completed += entry.tasks_completed;
            }
            None => {
                index.insert(entry.category_id.clone(), merged.len());
                merged.push(entry.clone());
            }
        }
    }
    merged.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.category_id.cmp(&b.category_id))
    });
    merged
}

/// Folds seven consecutive days starting on a Monday into one summary.
pub(crate) fn summarize_week(days: &[DayCounts]) -> Option<WeekSummary> {
    let first = days.first()?;
    let last = days.last()?;
    let created: i64 = days.iter().map(|d| d.created).sum();
    let completed: i64 = days.iter().map(|d| d.completed).sum();
    let overdue: i64 = days.iter().map(|d| d.overdue).sum();
    let iso = first.date.iso_week();

    Some(WeekSummary {
        week_start: first.date,
        week_end: last.date,
        iso_year: iso.year(),
        iso_week: iso.week(),
        created,
        completed,
        overdue,
        completion_rate: percentage(completed, created),
        most_productive_day: most_productive_day(days),
        average_tasks_per_day: round2(created as f64 / 7.0),
        daily_breakdown: days
            .iter()
            .map(|d| DayBreakdown {
                date: d.date,
                tasks_created: d.created,
                tasks_completed: d.completed,
                completion_rate: percentage(d.completed, d.created),
            })
            .collect(),
        categories: merge_categories(days),
    })
}

fn deserialize_weekly(row: SqliteRow) -> AppResult<WeeklyStats> {
    let week_start: String = row.try_get("week_start").map_err(AppError::from)?;
    let week_end: String = row.try_get("week_end").map_err(AppError::from)?;
    let daily_breakdown: String = row.try_get("daily_breakdown").map_err(AppError::from)?;
    let categories: String = row.try_get("categories").map_err(AppError::from)?;
    let iso_week: i64 = row.try_get("iso_week").map_err(AppError::from)?;
    Ok(WeeklyStats {
        id: row.try_get("id").map_err(AppError::from)?,
        user_id: row.try_get("user_id").map_err(AppError::from)?,
        week_start: parse_stored_date(&week_start, "week_start")?,
        week_end: parse_stored_date(&week_end, "week_end")?,
        iso_year: row.try_get("iso_year").map_err(AppError::from)?,
        iso_week: u32::try_from(iso_week).unwrap_or_default(),
        tasks_created: row.try_get("tasks_created").map_err(AppError::from)?,
        tasks_completed: row.try_get("tasks_completed").map_err(AppError::from)?,
        tasks_overdue: row.try_get("tasks_overdue").map_err(AppError::from)?,
        completion_rate: row.try_get("completion_rate").map_err(AppError::from)?,
        most_productive_day: row.try_get("most_productive_day").map_err(AppError::from)?,
        average_tasks_per_day: row
            .try_get("average_tasks_per_day")
            .map_err(AppError::from)?,
        daily_breakdown: decode_json(&daily_breakdown, "daily_breakdown")?,
        categories: decode_json(&categories, "categories")?,
        created_at: row.try_get("created_at").map_err(AppError::from)?,
        updated_at: row.try_get("updated_at").map_err(AppError::from)?,
    })
}

/// Recomputes the rollup for the ISO week containing `date` from the live task
/// store and overwrites the stored row.
pub async fn recompute_weekly(
    pool: &SqlitePool,
    user_id: &str,
    date: NaiveDate,
) -> AppResult<WeeklyStats> {
    let scope = LogScope::new("analytics_recompute_weekly", Some(user_id));
    let result: AppResult<_> = async {
        ensure_supported(date)?;
        let monday = week_start(date);
        let sunday = add_days(monday, 6);
        validate_range(monday, sunday)?;
        let days = gather_days(pool, user_id, monday, sunday).await?;
        let summary = summarize_week(&days).ok_or_else(|| {
            AppError::new(crate::db::STORE_FAILURE, "Weekly rollup had no days to summarize.")
        })?;
        let breakdown_json = serde_json::to_string(&summary.daily_breakdown)?;
        let categories_json = serde_json::to_string(&summary.categories)?;
        let now = now_ms();

        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| store_unavailable(err, "weekly_write_begin"))?;
        sqlx::query(
            "INSERT INTO weekly_stats \
             (id, user_id, week_start, week_end, iso_year, iso_week, tasks_created, \
              tasks_completed, tasks_overdue, completion_rate, most_productive_day, \
              average_tasks_per_day, daily_breakdown, categories, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15) \
             ON CONFLICT(user_id, week_start) DO UPDATE SET \
               week_end = excluded.week_end, \
               iso_year = excluded.iso_year, \
               iso_week = excluded.iso_week, \
               tasks_created = excluded.tasks_created, \
               tasks_completed = excluded.tasks_completed, \
               tasks_overdue = excluded.tasks_overdue, \
               completion_rate = excluded.completion_rate, \
               most_productive_day = excluded.most_productive_day, \
               average_tasks_per_day = excluded.average_tasks_per_day, \
               daily_breakdown = excluded.daily_breakdown, \
               categories = excluded.categories, \
               updated_at = excluded.updated_at",
        )
        .bind(new_uuid_v7())
        .bind(user_id)
        .bind(format_date(summary.week_start))
        .bind(format_date(summary.week_end))
        .bind(summary.iso_year)
        .bind(i64::from(summary.iso_week))
        .bind(summary.created)
        .bind(summary.completed)
        .bind(summary.overdue)
        .bind(summary.completion_rate)
        .bind(&summary.most_productive_day)
        .bind(summary.average_tasks_per_day)
        .bind(&breakdown_json)
        .bind(&categories_json)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|err| store_unavailable(err, "weekly_write"))?;

        let row = sqlx::query(&format!(
            "SELECT {WEEKLY_COLUMNS} FROM weekly_stats WHERE user_id = ? AND week_start = ?"
        ))
        .bind(user_id)
        .bind(format_date(summary.week_start))
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| store_unavailable(err, "weekly_write_fetch"))?;

        tx.commit()
            .await
            .map_err(|err| store_unavailable(err, "weekly_write_commit"))?;
        deserialize_weekly(row)
    }
    .await;
    scope.finish(result, |stats| {
        json!({
            "week_start": format_date(stats.week_start),
            "completion_rate": stats.completion_rate,
        })
    })
}

/// Stored weekly rollups whose week overlaps `start..=end`, oldest first.
pub async fn list_weekly_stats(
    pool: &SqlitePool,
    user_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> AppResult<Vec<WeeklyStats>> {
    let scope = LogScope::new("analytics_list_weekly", Some(user_id));
    let result: AppResult<_> = async {
        let first = week_start(start);
        let last = week_start(end);
        validate_range(first, last)?;
        let rows = sqlx::query(&format!(
            "SELECT {WEEKLY_COLUMNS} FROM weekly_stats \
             WHERE user_id = ? AND week_start >= ? AND week_start <= ? ORDER BY week_start"
        ))
        .bind(user_id)
        .bind(format_date(first))
        .bind(format_date(last))
        .fetch_all(pool)
        .await
        .map_err(|err| store_unavailable(err, "weekly_list"))?;
        rows.into_iter().map(deserialize_weekly).collect()
    }
    .await;
    scope.finish(result, |rows: &Vec<WeeklyStats>| json!({ "rows": rows.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
    }

    fn week(counts: &[(i64, i64)]) -> Vec<DayCounts> {
        counts
            .iter()
            .enumerate()
            .map(|(i, &(created, completed))| DayCounts {
                date: add_days(monday(), i as i64),
                created,
                completed,
                overdue: 1,
                focus_minutes: None,
                categories: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn empty_week_has_zero_rate_and_no_best_day() {
        let summary = summarize_week(&week(&[(0, 0); 7])).unwrap();
        assert_eq!(summary.completion_rate, 0.0);
        assert_eq!(summary.most_productive_day, None);
        assert_eq!(summary.average_tasks_per_day, 0.0);
        assert_eq!(summary.overdue, 7);
        assert_eq!(summary.iso_week, 11);
        assert_eq!(summary.week_end, NaiveDate::from_ymd_opt(2024, 3, 17).unwrap());
    }

    #[test]
    fn earliest_day_wins_a_tie() {
        let summary =
            summarize_week(&week(&[(1, 0), (2, 3), (0, 1), (4, 3), (0, 0), (0, 0), (3, 0)]))
                .unwrap();
        assert_eq!(summary.most_productive_day.as_deref(), Some("Tuesday"));
        assert_eq!(summary.created, 10);
        assert_eq!(summary.completed, 7);
        assert_eq!(summary.completion_rate, 70.0);
        assert_eq!(summary.average_tasks_per_day, 1.43);
    }

    #[test]
    fn categories_merge_across_days() {
        let mut days = week(&[(1, 0); 7]);
        let cat = |created, completed| CategoryBreakdown {
            category_id: "c1".into(),
            name: "Work".into(),
            color: "#3b82f6".into(),
            tasks_created: created,
            tasks_completed: completed,
        };
        days[0].categories.push(cat(2, 0));
        days[3].categories.push(cat(1, 2));
        let merged = merge_categories(&days);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].tasks_created, 3);
        assert_eq!(merged[0].tasks_completed, 2);
    }

    proptest! {
        #[test]
        fn completion_rate_stays_within_bounds(
            counts in prop::collection::vec((0i64..50, 0i64..80), 7)
        ) {
            let summary = summarize_week(&week(&counts)).unwrap();
            prop_assert!((0.0..=100.0).contains(&summary.completion_rate));
            if summary.created == 0 {
                prop_assert_eq!(summary.completion_rate, 0.0);
            }
        }
    }
}
