//! Attachment metadata. Blobs live in an external file store; this module only
//! records where they are and what they claim to be.

use std::path::Path;

use serde_json::json;
use sqlx::{sqlite::SqliteRow, SqlitePool};

use crate::comments::ensure_task_owned;
use crate::db::{column, wrap_unexpected, BEGIN_IMMEDIATE};
use crate::id::new_uuid_v7;
use crate::model::{
    NewAttachment, TaskAttachment, ALLOWED_ATTACHMENT_EXTENSIONS, ATTACHMENT_NOT_FOUND,
    VALIDATION_ATTACHMENT,
};
use crate::op_log::LogScope;
use crate::time::now_ms;
use crate::{AppError, AppResult};

const FILE_NAME_MAX_CHARS: usize = 255;
const ATTACHMENT_COLUMNS: &str =
    "id, task_id, user_id, file_name, file_size, file_type, storage_key, uploaded_at";

fn deserialize_attachment(row: SqliteRow) -> AppResult<TaskAttachment> {
    Ok(TaskAttachment {
        id: column(&row, "id")?,
        task_id: column(&row, "task_id")?,
        user_id: column(&row, "user_id")?,
        file_name: column(&row, "file_name")?,
        file_size: column(&row, "file_size")?,
        file_type: column(&row, "file_type")?,
        storage_key: column(&row, "storage_key")?,
        uploaded_at: column(&row, "uploaded_at")?,
    })
}

fn invalid(message: &str) -> AppError {
    AppError::new(VALIDATION_ATTACHMENT, message.to_string())
}

/// Lower-cased extension of `file_name`, if it is one we accept.
fn allowed_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_ATTACHMENT_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

fn validate(input: &NewAttachment) -> AppResult<()> {
    let name = input.file_name.trim();
    if name.is_empty() {
        return Err(invalid("A file name is required."));
    }
    if name.chars().count() > FILE_NAME_MAX_CHARS {
        return Err(invalid("File names may be at most 255 characters.")
            .with_context("length", name.chars().count().to_string()));
    }
    if allowed_extension(name).is_none() {
        return Err(invalid("That file type can't be attached.")
            .with_context("file_name", name.to_string())
            .with_context("allowed", ALLOWED_ATTACHMENT_EXTENSIONS.join(",")));
    }
    if input.file_size < 0 {
        return Err(invalid("File size cannot be negative.")
            .with_context("file_size", input.file_size.to_string()));
    }
    if input.storage_key.trim().is_empty() {
        return Err(invalid("A storage key is required."));
    }
    Ok(())
}

/// Newest first.
pub async fn list_attachments(
    pool: &SqlitePool,
    user_id: &str,
    task_id: &str,
) -> AppResult<Vec<TaskAttachment>> {
    let scope = LogScope::new("attachments_list", Some(user_id));
    let result: AppResult<_> = async {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "attachments_list_acquire"))?;
        ensure_task_owned(&mut conn, user_id, task_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM task_attachments WHERE task_id = ? \
             ORDER BY uploaded_at DESC, id DESC"
        ))
        .bind(task_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "attachments_list"))?;
        rows.into_iter().map(deserialize_attachment).collect()
    }
    .await;
    scope.finish(result, |attachments: &Vec<TaskAttachment>| {
        json!({ "task_id": task_id, "rows": attachments.len() })
    })
}

pub async fn register_attachment(
    pool: &SqlitePool,
    user_id: &str,
    task_id: &str,
    input: NewAttachment,
) -> AppResult<TaskAttachment> {
    let scope = LogScope::new("attachments_register", Some(user_id));
    let result: AppResult<_> = async {
        validate(&input)?;
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "attachments_register_begin"))?;
        ensure_task_owned(&mut tx, user_id, task_id).await?;

        let attachment = TaskAttachment {
            id: new_uuid_v7(),
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            file_name: input.file_name.trim().to_string(),
            file_size: input.file_size,
            file_type: input.file_type.trim().to_string(),
            storage_key: input.storage_key.trim().to_string(),
            uploaded_at: now_ms(),
        };
        sqlx::query(&format!(
            "INSERT INTO task_attachments ({ATTACHMENT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))
        .bind(&attachment.id)
        .bind(&attachment.task_id)
        .bind(&attachment.user_id)
        .bind(&attachment.file_name)
        .bind(attachment.file_size)
        .bind(&attachment.file_type)
        .bind(&attachment.storage_key)
        .bind(attachment.uploaded_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "attachments_register"))?;

        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "attachments_register_commit"))?;
        Ok(attachment)
    }
    .await;
    scope.finish(result, |attachment| {
        json!({ "id": attachment.id, "task_id": attachment.task_id, "file_size": attachment.file_size })
    })
}

/// Removes the metadata row and returns it so the caller can drop the blob.
pub async fn delete_attachment(
    pool: &SqlitePool,
    user_id: &str,
    task_id: &str,
    attachment_id: &str,
) -> AppResult<TaskAttachment> {
    let scope = LogScope::new("attachments_delete", Some(user_id));
    let result: AppResult<_> = async {
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "attachments_delete_begin"))?;
        ensure_task_owned(&mut tx, user_id, task_id).await?;

        let row = sqlx::query(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM task_attachments WHERE id = ? AND task_id = ?"
        ))
        .bind(attachment_id)
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "attachments_delete_fetch"))?;
        let Some(row) = row else {
            return Err(AppError::new(ATTACHMENT_NOT_FOUND, "Attachment not found.")
                .with_context("attachment_id", attachment_id.to_string()));
        };
        let attachment = deserialize_attachment(row)?;

        sqlx::query("DELETE FROM task_attachments WHERE id = ?")
            .bind(attachment_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "attachments_delete"))?;
        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "attachments_delete_commit"))?;
        Ok(attachment)
    }
    .await;
    scope.finish(result, |attachment| json!({ "id": attachment.id }))
}
