#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use acta_lib::model::NewUser;
use chrono::NaiveDate;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    acta_lib::migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

/// WAL database under `dir` opened the way the binary opens it.
pub async fn file_pool(dir: &Path) -> SqlitePool {
    let pool = acta_lib::db::open_sqlite_pool(&dir.join("acta.sqlite3"))
        .await
        .expect("open file pool");
    acta_lib::migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

/// Creates a user and returns its id.
pub async fn user(pool: &SqlitePool, email: &str) -> String {
    acta_lib::users::create_user(
        pool,
        NewUser {
            email: email.into(),
            first_name: "Test".into(),
            last_name: "User".into(),
        },
    )
    .await
    .expect("create user")
    .id
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Milliseconds for `hour:00` UTC on `day`.
pub fn at(day: NaiveDate, hour: u32) -> i64 {
    day.and_hms_opt(hour, 0, 0)
        .expect("valid time")
        .and_utc()
        .timestamp_millis()
}

/// Inserts a task row directly so tests control its timestamps.
pub async fn insert_task(
    pool: &SqlitePool,
    user_id: &str,
    status: &str,
    created_at: i64,
    completed_at: Option<i64>,
    due_date: Option<NaiveDate>,
    category_id: Option<&str>,
) -> String {
    let id = acta_lib::id::new_uuid_v7();
    sqlx::query(
        "INSERT INTO tasks (id, user_id, title, description, priority, status, due_date, \
           due_time, completed_at, actual_minutes, category_id, assigned_to, created_at, updated_at) \
         VALUES (?1, ?2, 'seeded', '', 'medium', ?3, ?4, NULL, ?5, NULL, ?6, NULL, ?7, ?7)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(status)
    .bind(due_date.map(|d| d.format("%Y-%m-%d").to_string()))
    .bind(completed_at)
    .bind(category_id)
    .bind(created_at)
    .execute(pool)
    .await
    .expect("insert task");
    id
}
