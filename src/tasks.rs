use std::collections::HashSet;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use sqlx::{sqlite::SqliteRow, SqliteConnection, SqlitePool};

use crate::db::{column, wrap_unexpected, BEGIN_IMMEDIATE};
use crate::lifecycle::{self, Current};
use crate::model::{
    BulkAction, BulkOutcome, BulkRequest, NewTask, Task, TaskPatch, TaskPriority, TaskStatus,
    DECODE_ERROR, TASK_NOT_FOUND, TITLE_MAX_CHARS, VALIDATION_ASSIGNEE, VALIDATION_BULK_IDS,
    VALIDATION_BULK_VALUE, VALIDATION_CATEGORY_REF, VALIDATION_MINUTES, VALIDATION_TITLE,
};
use crate::op_log::LogScope;
use crate::time::{add_days, format_date, now_ms, to_date, DATE_FORMAT};
use crate::users::user_exists;
use crate::{AppError, AppResult};

const TASK_COLUMNS: &str = "id, user_id, title, description, priority, status, due_date, due_time, \
     completed_at, actual_minutes, category_id, assigned_to, created_at, updated_at";
const TIME_FORMAT: &str = "%H:%M:%S";
const AGENDA_WINDOW_DAYS: i64 = 7;
const MS_PER_DAY: i64 = 86_400_000;

/// Offset pagination for task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 500;

    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset: offset.max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(50, 0)
    }
}

/// Fixed task views offered alongside the paged listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agenda {
    /// Due today, any status.
    DueToday,
    /// Due before today and still open.
    Overdue,
    /// Open tasks due between today and a week from today.
    Upcoming,
    /// Completed within the last seven days, most recent first.
    RecentlyCompleted,
}

fn decode_failure(field: &'static str, value: &str, err: impl std::fmt::Display) -> AppError {
    AppError::new(DECODE_ERROR, format!("Stored task has an invalid {field}."))
        .with_context("field", field)
        .with_context("value", value.to_string())
        .with_context("error", err.to_string())
}

fn parse_time(value: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
}

pub(crate) fn deserialize_task(row: SqliteRow) -> AppResult<Task> {
    let priority: String = column(&row, "priority")?;
    let status: String = column(&row, "status")?;
    let due_date: Option<String> = column(&row, "due_date")?;
    let due_time: Option<String> = column(&row, "due_time")?;

    let due_date = due_date
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, DATE_FORMAT)
                .map_err(|err| decode_failure("due_date", &raw, err))
        })
        .transpose()?;
    let due_time = due_time
        .map(|raw| parse_time(&raw).map_err(|err| decode_failure("due_time", &raw, err)))
        .transpose()?;

    Ok(Task {
        id: column(&row, "id")?,
        user_id: column(&row, "user_id")?,
        title: column(&row, "title")?,
        description: column(&row, "description")?,
        priority: TaskPriority::from_str(&priority)
            .map_err(|err| decode_failure("priority", &priority, err))?,
        status: TaskStatus::from_str(&status)
            .map_err(|err| decode_failure("status", &status, err))?,
        due_date,
        due_time,
        completed_at: column(&row, "completed_at")?,
        actual_minutes: column(&row, "actual_minutes")?,
        category_id: column(&row, "category_id")?,
        assigned_to: column(&row, "assigned_to")?,
        created_at: column(&row, "created_at")?,
        updated_at: column(&row, "updated_at")?,
    })
}

fn not_found(id: &str) -> AppError {
    AppError::new(TASK_NOT_FOUND, "Task not found.").with_context("task_id", id.to_string())
}

fn validate_title(title: &str) -> AppResult<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(VALIDATION_TITLE, "A task title is required."));
    }
    let length = trimmed.chars().count();
    if length > TITLE_MAX_CHARS {
        return Err(AppError::new(
            VALIDATION_TITLE,
            format!("Task titles may be at most {TITLE_MAX_CHARS} characters."),
        )
        .with_context("length", length.to_string()));
    }
    Ok(trimmed.to_string())
}

fn validate_minutes(minutes: Option<i64>) -> AppResult<()> {
    match minutes {
        Some(value) if value < 0 => Err(AppError::new(
            VALIDATION_MINUTES,
            "Tracked minutes cannot be negative.",
        )
        .with_context("actual_minutes", value.to_string())),
        _ => Ok(()),
    }
}

async fn ensure_category_owned(
    conn: &mut SqliteConnection,
    user_id: &str,
    category_id: Option<&str>,
) -> AppResult<()> {
    let Some(category_id) = category_id else {
        return Ok(());
    };
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM categories WHERE id = ? AND user_id = ?")
            .bind(category_id)
            .bind(user_id)
            .fetch_optional(conn)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "task_category_lookup"))?;
    if found.is_none() {
        return Err(AppError::new(
            VALIDATION_CATEGORY_REF,
            "Choose one of your own categories.",
        )
        .with_context("category_id", category_id.to_string()));
    }
    Ok(())
}

async fn ensure_assignee(conn: &mut SqliteConnection, assignee: Option<&str>) -> AppResult<()> {
    let Some(assignee) = assignee else {
        return Ok(());
    };
    if !user_exists(conn, assignee).await? {
        return Err(
            AppError::new(VALIDATION_ASSIGNEE, "The assignee does not exist.")
                .with_context("assigned_to", assignee.to_string()),
        );
    }
    Ok(())
}

async fn fetch_owned(
    conn: &mut SqliteConnection,
    user_id: &str,
    id: &str,
) -> AppResult<Option<Task>> {
    let row = sqlx::query(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND user_id = ?"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(conn)
    .await
    .map_err(|err| wrap_unexpected(err.into(), "tasks_fetch"))?;
    row.map(deserialize_task).transpose()
}

/// Persists every mutable column of `task`.
async fn write_task(conn: &mut SqliteConnection, task: &Task) -> AppResult<()> {
    sqlx::query(
        "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, status = ?4, \
         due_date = ?5, due_time = ?6, completed_at = ?7, actual_minutes = ?8, \
         category_id = ?9, assigned_to = ?10, updated_at = ?11 \
         WHERE id = ?12 AND user_id = ?13",
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.priority.as_str())
    .bind(task.status.as_str())
    .bind(task.due_date.map(format_date))
    .bind(task.due_time.map(|t| t.format(TIME_FORMAT).to_string()))
    .bind(task.completed_at)
    .bind(task.actual_minutes)
    .bind(&task.category_id)
    .bind(&task.assigned_to)
    .bind(task.updated_at)
    .bind(&task.id)
    .bind(&task.user_id)
    .execute(conn)
    .await
    .map_err(|err| wrap_unexpected(err.into(), "tasks_write"))?;
    Ok(())
}

/// Moves `task` to `next`, resolving `completed_at` through the lifecycle rule.
async fn apply_status(
    conn: &mut SqliteConnection,
    mut task: Task,
    next: TaskStatus,
    now: i64,
) -> AppResult<Task> {
    let current = Current {
        status: task.status,
        completed_at: task.completed_at,
    };
    task.completed_at = lifecycle::transition(Some(current), next, now);
    task.status = next;
    task.updated_at = now;
    write_task(conn, &task).await?;
    Ok(task)
}

pub async fn create_task(pool: &SqlitePool, user_id: &str, input: NewTask) -> AppResult<Task> {
    let scope = LogScope::new("tasks_create", Some(user_id));
    let result: AppResult<_> = async {
        let title = validate_title(&input.title)?;
        validate_minutes(input.actual_minutes)?;

        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_create_begin"))?;
        ensure_category_owned(&mut tx, user_id, input.category_id.as_deref()).await?;
        ensure_assignee(&mut tx, input.assigned_to.as_deref()).await?;

        let now = now_ms();
        let task = Task {
            id: crate::id::new_uuid_v7(),
            user_id: user_id.to_string(),
            title,
            description: input.description.trim().to_string(),
            priority: input.priority,
            status: input.status,
            due_date: input.due_date,
            due_time: input.due_time,
            completed_at: lifecycle::transition(None, input.status, now),
            actual_minutes: input.actual_minutes,
            category_id: input.category_id,
            assigned_to: input.assigned_to,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ))
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(task.due_date.map(format_date))
        .bind(task.due_time.map(|t| t.format(TIME_FORMAT).to_string()))
        .bind(task.completed_at)
        .bind(task.actual_minutes)
        .bind(&task.category_id)
        .bind(&task.assigned_to)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "tasks_create_insert"))?;

        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_create_commit"))?;
        Ok(task)
    }
    .await;
    scope.finish(result, |task| json!({ "id": task.id, "status": task.status }))
}

pub async fn get_task(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<Task> {
    let scope = LogScope::new("tasks_get", Some(user_id));
    let result: AppResult<_> = async {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_get_acquire"))?;
        fetch_owned(&mut conn, user_id, id)
            .await?
            .ok_or_else(|| not_found(id))
    }
    .await;
    scope.finish(result, |task| json!({ "id": task.id }))
}

/// Newest first.
pub async fn list_tasks(pool: &SqlitePool, user_id: &str, page: Page) -> AppResult<Vec<Task>> {
    let scope = LogScope::new("tasks_list", Some(user_id));
    let result: AppResult<_> = async {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await
        .map_err(|err| wrap_unexpected(err.into(), "tasks_list"))?;
        rows.into_iter().map(deserialize_task).collect()
    }
    .await;
    scope.finish(result, |tasks: &Vec<Task>| {
        json!({ "rows": tasks.len(), "offset": page.offset })
    })
}

pub async fn update_task(
    pool: &SqlitePool,
    user_id: &str,
    id: &str,
    patch: TaskPatch,
) -> AppResult<Task> {
    let scope = LogScope::new("tasks_update", Some(user_id));
    let result: AppResult<_> = async {
        let title = patch.title.as_deref().map(validate_title).transpose()?;
        if let Some(minutes) = patch.actual_minutes {
            validate_minutes(minutes)?;
        }

        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_update_begin"))?;
        let mut task = fetch_owned(&mut tx, user_id, id)
            .await?
            .ok_or_else(|| not_found(id))?;

        if let Some(category_id) = &patch.category_id {
            ensure_category_owned(&mut tx, user_id, category_id.as_deref()).await?;
        }
        if let Some(assigned_to) = &patch.assigned_to {
            ensure_assignee(&mut tx, assigned_to.as_deref()).await?;
        }

        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description.trim().to_string();
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(due_time) = patch.due_time {
            task.due_time = due_time;
        }
        if let Some(minutes) = patch.actual_minutes {
            task.actual_minutes = minutes;
        }
        if let Some(category_id) = patch.category_id {
            task.category_id = category_id;
        }
        if let Some(assigned_to) = patch.assigned_to {
            task.assigned_to = assigned_to;
        }

        let now = now_ms();
        let next = patch.status.unwrap_or(task.status);
        let task = apply_status(&mut tx, task, next, now).await?;

        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_update_commit"))?;
        Ok(task)
    }
    .await;
    scope.finish(result, |task| json!({ "id": task.id, "status": task.status }))
}

/// Hard delete; comments and attachments go with the task.
pub async fn delete_task(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<()> {
    let scope = LogScope::new("tasks_delete", Some(user_id));
    let result: AppResult<_> = async {
        let done = sqlx::query("DELETE FROM tasks WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_delete"))?;
        if done.rows_affected() == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }
    .await;
    scope.finish(result, |_| json!({ "id": id }))
}

/// Quick status change.
pub async fn set_status(
    pool: &SqlitePool,
    user_id: &str,
    id: &str,
    status: TaskStatus,
) -> AppResult<Task> {
    let scope = LogScope::new("tasks_set_status", Some(user_id));
    let result: AppResult<_> = async {
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_set_status_begin"))?;
        let task = fetch_owned(&mut tx, user_id, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        let task = apply_status(&mut tx, task, status, now_ms()).await?;
        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_set_status_commit"))?;
        Ok(task)
    }
    .await;
    scope.finish(result, |task| json!({ "id": task.id, "status": task.status }))
}

pub async fn toggle_complete(pool: &SqlitePool, user_id: &str, id: &str) -> AppResult<Task> {
    let scope = LogScope::new("tasks_toggle_complete", Some(user_id));
    let result: AppResult<_> = async {
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_toggle_begin"))?;
        let task = fetch_owned(&mut tx, user_id, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        let next = lifecycle::toggle_target(task.status);
        let task = apply_status(&mut tx, task, next, now_ms()).await?;
        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_toggle_commit"))?;
        Ok(task)
    }
    .await;
    scope.finish(result, |task| json!({ "id": task.id, "status": task.status }))
}

enum BulkOp {
    Complete,
    Delete,
    Priority(TaskPriority),
    Status(TaskStatus),
}

fn bulk_value<'a>(request: &'a BulkRequest, action: BulkAction) -> AppResult<&'a str> {
    request
        .value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::new(
                VALIDATION_BULK_VALUE,
                format!("The {action} action needs a value."),
            )
            .with_context("action", action.as_str())
        })
}

fn resolve_bulk_op(request: &BulkRequest) -> AppResult<(BulkAction, BulkOp)> {
    let action = BulkAction::from_str(&request.action)?;
    let op = match action {
        BulkAction::Complete => BulkOp::Complete,
        BulkAction::Delete => BulkOp::Delete,
        BulkAction::ChangePriority => {
            let raw = bulk_value(request, action)?;
            BulkOp::Priority(TaskPriority::from_str(raw).map_err(|err| {
                AppError::new(VALIDATION_BULK_VALUE, "Unknown priority value.")
                    .with_context("value", raw.to_string())
                    .with_cause(err)
            })?)
        }
        BulkAction::ChangeStatus => {
            let raw = bulk_value(request, action)?;
            BulkOp::Status(TaskStatus::from_str(raw).map_err(|err| {
                AppError::new(VALIDATION_BULK_VALUE, "Unknown status value.")
                    .with_context("value", raw.to_string())
                    .with_cause(err)
            })?)
        }
    };
    Ok((action, op))
}

/// Applies one action to the caller's tasks among `request.task_ids`.
///
/// Ids that do not exist or belong to someone else are skipped. The whole
/// request commits or rolls back as one transaction.
pub async fn bulk_action(
    pool: &SqlitePool,
    user_id: &str,
    request: BulkRequest,
) -> AppResult<BulkOutcome> {
    let scope = LogScope::new("tasks_bulk_action", Some(user_id));
    let result: AppResult<_> = async {
        let (action, op) = resolve_bulk_op(&request)?;

        let mut seen = HashSet::new();
        let ids: Vec<&str> = request
            .task_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Err(AppError::new(
                VALIDATION_BULK_IDS,
                "Select at least one task.",
            ));
        }

        let now = now_ms();
        let mut tx = pool
            .begin_with(BEGIN_IMMEDIATE)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_bulk_begin"))?;

        let mut affected = 0u64;
        for id in &ids {
            let Some(mut task) = fetch_owned(&mut tx, user_id, id).await? else {
                continue;
            };
            match &op {
                BulkOp::Complete => {
                    apply_status(&mut tx, task, TaskStatus::Completed, now).await?;
                }
                BulkOp::Status(next) => {
                    apply_status(&mut tx, task, *next, now).await?;
                }
                BulkOp::Priority(priority) => {
                    task.priority = *priority;
                    task.updated_at = now;
                    write_task(&mut tx, &task).await?;
                }
                BulkOp::Delete => {
                    sqlx::query("DELETE FROM tasks WHERE id = ? AND user_id = ?")
                        .bind(*id)
                        .bind(user_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|err| wrap_unexpected(err.into(), "tasks_bulk_delete"))?;
                }
            }
            affected += 1;
        }

        tx.commit()
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_bulk_commit"))?;

        Ok(BulkOutcome {
            action,
            requested: ids.len(),
            affected,
        })
    }
    .await;
    scope.finish(result, |outcome| {
        json!({
            "action": outcome.action,
            "requested": outcome.requested,
            "affected": outcome.affected,
        })
    })
}

/// Runs one of the fixed views as of the instant `now`.
pub async fn agenda_at(
    pool: &SqlitePool,
    user_id: &str,
    agenda: Agenda,
    now: i64,
) -> AppResult<Vec<Task>> {
    let today = to_date(now).date_naive();
    let base = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1");
    let sql = match agenda {
        Agenda::DueToday => {
            format!("{base} AND due_date = ?2 ORDER BY due_time IS NULL, due_time, created_at")
        }
        Agenda::Overdue => format!(
            "{base} AND due_date < ?2 AND status IN ('pending', 'in_progress') \
             ORDER BY due_date, created_at"
        ),
        Agenda::Upcoming => format!(
            "{base} AND due_date >= ?2 AND due_date <= ?3 \
             AND status IN ('pending', 'in_progress') ORDER BY due_date, created_at"
        ),
        Agenda::RecentlyCompleted => format!(
            "{base} AND status = 'completed' AND completed_at >= ?2 \
             ORDER BY completed_at DESC, id DESC"
        ),
    };
    let query = sqlx::query(&sql).bind(user_id);
    let query = match agenda {
        Agenda::DueToday | Agenda::Overdue => query.bind(format_date(today)),
        Agenda::Upcoming => query
            .bind(format_date(today))
            .bind(format_date(add_days(today, AGENDA_WINDOW_DAYS))),
        Agenda::RecentlyCompleted => query.bind(now - AGENDA_WINDOW_DAYS * MS_PER_DAY),
    };
    let scope = LogScope::new("tasks_agenda", Some(user_id));
    let result: AppResult<_> = async {
        let rows = query
            .fetch_all(pool)
            .await
            .map_err(|err| wrap_unexpected(err.into(), "tasks_agenda"))?;
        rows.into_iter().map(deserialize_task).collect()
    }
    .await;
    scope.finish(result, |tasks: &Vec<Task>| {
        json!({ "agenda": format!("{agenda:?}"), "rows": tasks.len() })
    })
}

pub async fn due_today(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Task>> {
    agenda_at(pool, user_id, Agenda::DueToday, now_ms()).await
}

pub async fn overdue(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Task>> {
    agenda_at(pool, user_id, Agenda::Overdue, now_ms()).await
}

pub async fn upcoming(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Task>> {
    agenda_at(pool, user_id, Agenda::Upcoming, now_ms()).await
}

pub async fn recently_completed(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Task>> {
    agenda_at(pool, user_id, Agenda::RecentlyCompleted, now_ms()).await
}
