use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use sqlx::{sqlite::SqliteRow, SqliteConnection, SqlitePool};

use crate::db::{column, wrap_unexpected};
use crate::error::is_unique_violation;
use crate::id::new_uuid_v7;
use crate::model::{NewUser, User, USER_NOT_FOUND, VALIDATION_EMAIL, VALIDATION_EMAIL_TAKEN};
use crate::op_log::LogScope;
use crate::time::now_ms;
use crate::{AppError, AppResult};

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email validation pattern to compile")
});

const USER_COLUMNS: &str = "id, email, first_name, last_name, is_active, created_at";

fn normalize_email(email: &str) -> AppResult<String> {
    let normalized = email.trim().to_lowercase();
    if normalized.is_empty() || !EMAIL_PATTERN.is_match(&normalized) {
        return Err(
            AppError::new(VALIDATION_EMAIL, "Enter a valid email address.")
                .with_context("email", email.to_string()),
        );
    }
    Ok(normalized)
}

fn deserialize_user(row: SqliteRow) -> AppResult<User> {
    let is_active: i64 = column(&row, "is_active")?;
    Ok(User {
        id: column(&row, "id")?,
        email: column(&row, "email")?,
        first_name: column(&row, "first_name")?,
        last_name: column(&row, "last_name")?,
        is_active: is_active != 0,
        created_at: column(&row, "created_at")?,
    })
}

fn not_found(id: &str) -> AppError {
    AppError::new(USER_NOT_FOUND, "User not found.").with_context("user_id", id.to_string())
}

pub(crate) async fn user_exists(conn: &mut SqliteConnection, id: &str) -> AppResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "user_exists"))?;
    Ok(found.is_some())
}

pub async fn create_user(pool: &SqlitePool, input: NewUser) -> AppResult<User> {
    let scope = LogScope::new("users_create", None);
    let result: AppResult<_> = async {
        let email = normalize_email(&input.email)?;
        let now = now_ms();
        let id = new_uuid_v7();
        sqlx::query(
            "INSERT INTO users (id, email, first_name, last_name, is_active, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
        )
        .bind(&id)
        .bind(&email)
        .bind(input.first_name.trim())
        .bind(input.last_name.trim())
        .bind(now)
        .execute(pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::new(VALIDATION_EMAIL_TAKEN, "That email address is already registered.")
                    .with_context("email", email.clone())
            } else {
                wrap_unexpected(err.into(), "users_create")
            }
        })?;

        Ok(User {
            id,
            email,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            is_active: true,
            created_at: now,
        })
    }
    .await;
    scope.finish(result, |user| json!({ "id": user.id }))
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> AppResult<User> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "users_get"))?;
    match row {
        Some(row) => deserialize_user(row),
        None => Err(not_found(id)),
    }
}

pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
    let normalized = email.trim().to_lowercase();
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
        .bind(&normalized)
        .fetch_optional(pool)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "users_find_by_email"))?;
    row.map(deserialize_user).transpose()
}

pub async fn list_users(pool: &SqlitePool) -> AppResult<Vec<User>> {
    let rows = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, email"
    ))
    .fetch_all(pool)
    .await
    .map_err(|err| wrap_unexpected(err.into(), "users_list"))?;
    rows.into_iter().map(deserialize_user).collect()
}

/// Active users, used by batch analytics when no single user is selected.
pub async fn list_active_user_ids(pool: &SqlitePool) -> AppResult<Vec<String>> {
    sqlx::query_scalar("SELECT id FROM users WHERE is_active = 1 ORDER BY created_at, id")
        .fetch_all(pool)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "users_list_active"))
}
