use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

use crate::db::{wrap_unexpected, BEGIN_IMMEDIATE};
use crate::error::is_unique_violation;
use crate::id::new_uuid_v7;
use crate::model::{
    Category, CategoryPatch, NewCategory, CATEGORY_NAME_MAX_CHARS, CATEGORY_NOT_FOUND,
    DEFAULT_CATEGORY_COLOR, VALIDATION_CATEGORY_NAME, VALIDATION_CATEGORY_NAME_TAKEN,
    VALIDATION_COLOR,
};
use crate::op_log::LogScope;
use crate::time::now_ms;
use crate::{AppError, AppResult};

static HEX_COLOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex color pattern to compile"));

const CATEGORY_SELECT: &str = "SELECT c.id, c.user_id, c.name, c.description, c.color, c.icon, \
     c.is_default, c.created_at, c.updated_at, \
     (SELECT COUNT(*) FROM tasks t WHERE t.category_id = c.id) AS task_count \
     FROM categories c";

impl TryFrom<&SqliteRow> for Category {
    type Error = AppError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id").map_err(AppError::from)?,
            user_id: row.try_get("user_id").map_err(AppError::from)?,
            name: row.try_get("name").map_err(AppError::from)?,
            description: row.try_get("description").map_err(AppError::from)?,
            color: row.try_get("color").map_err(AppError::from)?,
            icon: row.try_get("icon").map_err(AppError::from)?,
            is_default: row
                .try_get::<i64, _>("is_default")
                .map(|value| value != 0)
                .map_err(AppError::from)?,
            task_count: row.try_get("task_count").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

fn not_found(id: &str) -> AppError {
    AppError::new(CATEGORY_NOT_FOUND, "Category not found.")
        .with_context("category_id", id.to_string())
}

fn validate_name(name: &str) -> AppResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(
            VALIDATION_CATEGORY_NAME,
            "A category name is required.",
        ));
    }
    let length = trimmed.chars().count();
    if length > CATEGORY_NAME_MAX_CHARS {
        return Err(AppError::new(
            VALIDATION_CATEGORY_NAME,
            format!("Category names may be at most {CATEGORY_NAME_MAX_CHARS} characters."),
        )
        .with_context("length", length.to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_color(color: &str) -> AppResult<String> {
    let trimmed = color.trim();
    if !HEX_COLOR_PATTERN.is_match(trimmed) {
        return Err(
            AppError::new(VALIDATION_COLOR, "Colors must use the #RRGGBB format.")
                .with_context("color", color.to_string()),
        );
    }
    Ok(trimmed.to_string())
}

fn map_write_error(err: sqlx::Error, name: &str, operation: &'static str) -> AppError {
    if is_unique_violation(&err) {
        AppError::new(
            VALIDATION_CATEGORY_NAME_TAKEN,
            "You already have a category with that name.",
        )
        .with_context("name", name.to_string())
    } else {
        wrap_unexpected(err.into(), operation)
    }
}

async fn fetch_owned(
    conn: &mut SqliteConnection,
    user_id: &str,
    id: &str,
) -> AppResult<Option<Category>> {
    let row = sqlx::query(&format!(
        "{CATEGORY_SELECT} WHERE c.id = ? AND c.user_id = ?"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(conn)
    .await
    .map_err(|err| wrap_unexpected(err.into(), "categories_fetch"))?;
    row.as_ref().map(Category::try_from).transpose()
}

pub async fn create_category(
    pool: &SqlitePool,
    user_id: &str,
    input: NewCategory,
) -> AppResult<Category> {
    let scope = LogScope::new("categories_create", Some(user_id));
    let result: AppResult<_> = async {
        let name = validate_name(&input.name)?;
        let color = match input.color.as_deref() {
            Some(color) => validate_color(color)?,
            None => DEFAULT_CATEGORY_COLOR.to_string(),
        };
        let now = now_ms();
        let category = Category {
            id: new_uuid_v7(),
            user_id: user_id.to_string(),
            name,
            description: input.description.trim().to_string(),
            color,
            icon: input.icon.trim().to_string(),
            is_default: input.is_default,
            task_count: 0,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO categories \
             (id, user_id, name, description, color, icon, is_default, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&category.id)
        .bind(&category.user_id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.color)
        .bind(&category.icon)
        .bind(i64::from(category.is_default))
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(pool)
        .await
        .map_err(|err| map_write_error(err, &category.name, "categories_create"))?;
        Ok(category)
    }
    .await;
    scope.finish(result, |category| json!({ "id": category.id }))
}

pub async fn get_category(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<Category> {
    let scope = LogScope::new("categories_get", Some(user_id));
    let result: AppResult<_> = async {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "categories_get_acquire"))?;
        fetch_owned(&mut conn, user_id, id)
            .await?
            .ok_or_else(|| not_found(id))
    }
    .await;
    scope.finish(result, |category| json!({ "id": category.id }))
}

/// Alphabetical by name.
pub async fn list_categories(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Category>> {
    let scope = LogScope::new("categories_list", Some(user_id));
    let result: AppResult<_> = async {
        let rows = sqlx::query(&format!(
            "{CATEGORY_SELECT} WHERE c.user_id = ? ORDER BY c.name COLLATE NOCASE, c.id"
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "categories_list"))?;
        rows.iter().map(Category::try_from).collect()
    }
    .await;
    scope.finish(result, |categories: &Vec<Category>| json!({ "rows": categories.len() }))
}

pub async fn update_category(
    pool: &SqlitePool,
    user_id: &str,
    id: &str,
    patch: CategoryPatch,
) -> AppResult<Category> {
    let scope = LogScope::new("categories_update", Some(user_id));
    let result: AppResult<_> = async {
        let name = patch.name.as_deref().map(validate_name).transpose()?;
        let color = patch.color.as_deref().map(validate_color).transpose()?;

        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "categories_update_begin"))?;
        let mut category = fetch_owned(&mut tx, user_id, id)
            .await?
            .ok_or_else(|| not_found(id))?;

        if let Some(name) = name {
            category.name = name;
        }
        if let Some(color) = color {
            category.color = color;
        }
        if let Some(description) = patch.description {
            category.description = description.trim().to_string();
        }
        if let Some(icon) = patch.icon {
            category.icon = icon.trim().to_string();
        }
        category.updated_at = now_ms();

        sqlx::query(
            "UPDATE categories SET name = ?1, description = ?2, color = ?3, icon = ?4, \
             updated_at = ?5 WHERE id = ?6 AND user_id = ?7",
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.color)
        .bind(&category.icon)
        .bind(category.updated_at)
        .bind(&category.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| map_write_error(err, &category.name, "categories_update"))?;

        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "categories_update_commit"))?;
        Ok(category)
    }
    .await;
    scope.finish(result, |category| json!({ "id": category.id }))
}

/// Deletes the category and detaches its tasks; the tasks themselves stay.
pub async fn delete_category(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<()> {
    let scope = LogScope::new("categories_delete", Some(user_id));
    let result: AppResult<_> = async {
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "categories_delete_begin"))?;

        if fetch_owned(&mut tx, user_id, id).await?.is_none() {
            return Err(not_found(id));
        }

        let detached = sqlx::query("UPDATE tasks SET category_id = NULL WHERE category_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "categories_delete_detach"))?
            .rows_affected();

        sqlx::query("DELETE FROM categories WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "categories_delete"))?;

        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "categories_delete_commit"))?;
        Ok(detached)
    }
    .await;
    scope
        .finish(result, |detached| json!({ "id": id, "detached_tasks": detached }))
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_must_be_six_digit_hex() {
        assert_eq!(validate_color(" #3b82f6 ").unwrap(), "#3b82f6");
        for bad in ["3b82f6", "#3b82f", "#GGGGGG", "#3b82f6ff", ""] {
            assert_eq!(validate_color(bad).unwrap_err().code(), VALIDATION_COLOR, "{bad}");
        }
    }

    #[test]
    fn names_are_required_and_bounded() {
        assert_eq!(validate_name("  Work ").unwrap(), "Work");
        assert_eq!(
            validate_name("").unwrap_err().code(),
            VALIDATION_CATEGORY_NAME
        );
        let long = "n".repeat(CATEGORY_NAME_MAX_CHARS + 1);
        assert_eq!(
            validate_name(&long).unwrap_err().code(),
            VALIDATION_CATEGORY_NAME
        );
    }
}
