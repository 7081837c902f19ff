use serde_json::json;
use sqlx::{sqlite::SqliteRow, SqliteConnection, SqlitePool};

use crate::db::{column, wrap_unexpected, BEGIN_IMMEDIATE};
use crate::id::new_uuid_v7;
use crate::model::{NewComment, TaskComment, COMMENT_NOT_FOUND, TASK_NOT_FOUND, VALIDATION_COMMENT};
use crate::op_log::LogScope;
use crate::time::now_ms;
use crate::{AppError, AppResult};

const COMMENT_MAX_CHARS: usize = 5_000;
const COMMENT_COLUMNS: &str = "id, task_id, user_id, content, is_internal, created_at, updated_at";

fn deserialize_comment(row: SqliteRow) -> AppResult<TaskComment> {
    let is_internal: i64 = column(&row, "is_internal")?;
    Ok(TaskComment {
        id: column(&row, "id")?,
        task_id: column(&row, "task_id")?,
        user_id: column(&row, "user_id")?,
        content: column(&row, "content")?,
        is_internal: is_internal != 0,
        created_at: column(&row, "created_at")?,
        updated_at: column(&row, "updated_at")?,
    })
}

fn validate_content(content: &str) -> AppResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(VALIDATION_COMMENT, "A comment cannot be empty."));
    }
    let length = trimmed.chars().count();
    if length > COMMENT_MAX_CHARS {
        return Err(AppError::new(
            VALIDATION_COMMENT,
            format!("Comments may be at most {COMMENT_MAX_CHARS} characters."),
        )
        .with_context("length", length.to_string()));
    }
    Ok(trimmed.to_string())
}

fn comment_not_found(id: &str) -> AppError {
    AppError::new(COMMENT_NOT_FOUND, "Comment not found.").with_context("comment_id", id.to_string())
}

/// Fails with `TASK/NOT_FOUND` unless `task_id` belongs to `user_id`.
pub(crate) async fn ensure_task_owned(
    conn: &mut SqliteConnection,
    user_id: &str,
    task_id: &str,
) -> AppResult<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM tasks WHERE id = ? AND user_id = ?")
        .bind(task_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "task_ownership_lookup"))?;
    if found.is_none() {
        return Err(AppError::new(TASK_NOT_FOUND, "Task not found.")
            .with_context("task_id", task_id.to_string()));
    }
    Ok(())
}

/// Oldest first.
pub async fn list_comments(
    pool: &SqlitePool,
    user_id: &str,
    task_id: &str,
) -> AppResult<Vec<TaskComment>> {
    let scope = LogScope::new("comments_list", Some(user_id));
    let result: AppResult<_> = async {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "comments_list_acquire"))?;
        ensure_task_owned(&mut conn, user_id, task_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM task_comments WHERE task_id = ? \
             ORDER BY created_at, id"
        ))
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "comments_list"))?;
        rows.into_iter().map(deserialize_comment).collect()
    }
    .await;
    scope.finish(result, |comments: &Vec<TaskComment>| {
        json!({ "task_id": task_id, "rows": comments.len() })
    })
}

pub async fn add_comment(
    pool: &SqlitePool,
    user_id: &str,
    task_id: &str,
    input: NewComment,
) -> AppResult<TaskComment> {
    let scope = LogScope::new("comments_add", Some(user_id));
    let result: AppResult<_> = async {
        let content = validate_content(&input.content)?;
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "comments_add_begin"))?;
        ensure_task_owned(&mut tx, user_id, task_id).await?;

        let now = now_ms();
        let comment = TaskComment {
            id: new_uuid_v7(),
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            content,
            is_internal: input.is_internal,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(&format!(
            "INSERT INTO task_comments ({COMMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ))
        .bind(&comment.id)
        .bind(&comment.task_id)
        .bind(&comment.user_id)
        .bind(&comment.content)
        .bind(i64::from(comment.is_internal))
        .bind(comment.created_at)
        .bind(comment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "comments_add"))?;

        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "comments_add_commit"))?;
        Ok(comment)
    }
    .await;
    scope.finish(result, |comment| json!({ "id": comment.id, "task_id": comment.task_id }))
}

/// Only the author may edit, and only on a task they own.
pub async fn update_comment(
    pool: &SqlitePool,
    user_id: &str,
    task_id: &str,
    comment_id: &str,
    content: &str,
) -> AppResult<TaskComment> {
    let scope = LogScope::new("comments_update", Some(user_id));
    let result: AppResult<_> = async {
        let content = validate_content(content)?;
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "comments_update_begin"))?;
        ensure_task_owned(&mut tx, user_id, task_id).await?;

        let done = sqlx::query(
            "UPDATE task_comments SET content = ?1, updated_at = ?2 \
             WHERE id = ?3 AND task_id = ?4 AND user_id = ?5",
        )
        .bind(&content)
        .bind(now_ms())
        .bind(comment_id)
        .bind(task_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "comments_update"))?;
        if done.rows_affected() == 0 {
            return Err(comment_not_found(comment_id));
        }

        let row = sqlx::query(&format!(
            "SELECT {COMMENT_COLUMNS} FROM task_comments WHERE id = ?"
        ))
        .bind(comment_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "comments_update_fetch"))?;

        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "comments_update_commit"))?;
        deserialize_comment(row)
    }
    .await;
    scope.finish(result, |comment| json!({ "id": comment.id }))
}

pub async fn delete_comment(
    pool: &SqlitePool,
    user_id: &str,
    task_id: &str,
    comment_id: &str,
) -> AppResult<()> {
    let scope = LogScope::new("comments_delete", Some(user_id));
    let result: AppResult<_> = async {
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "comments_delete_begin"))?;
        ensure_task_owned(&mut tx, user_id, task_id).await?;
        let done = sqlx::query(
            "DELETE FROM task_comments WHERE id = ? AND task_id = ? AND user_id = ?",
        )
        .bind(comment_id)
        .bind(task_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "comments_delete"))?;
        if done.rows_affected() == 0 {
            return Err(comment_not_found(comment_id));
        }
        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "comments_delete_commit"))?;
        Ok(())
    }
    .await;
    scope.finish(result, |_| json!({ "id": comment_id }))
}
