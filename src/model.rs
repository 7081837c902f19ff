use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{lifecycle, AppError};

pub const TASK_NOT_FOUND: &str = "TASK/NOT_FOUND";
pub const CATEGORY_NOT_FOUND: &str = "CATEGORY/NOT_FOUND";
pub const COMMENT_NOT_FOUND: &str = "COMMENT/NOT_FOUND";
pub const ATTACHMENT_NOT_FOUND: &str = "ATTACHMENT/NOT_FOUND";
pub const USER_NOT_FOUND: &str = "USER/NOT_FOUND";
pub const DECODE_ERROR: &str = "STORE/DECODE";
pub const ANALYTICS_STORE_UNAVAILABLE: &str = "ANALYTICS/STORE_UNAVAILABLE";

pub const VALIDATION_TITLE: &str = "VALIDATION/TITLE";
pub const VALIDATION_STATUS: &str = "VALIDATION/STATUS";
pub const VALIDATION_PRIORITY: &str = "VALIDATION/PRIORITY";
pub const VALIDATION_MINUTES: &str = "VALIDATION/ACTUAL_MINUTES";
pub const VALIDATION_CATEGORY_REF: &str = "VALIDATION/CATEGORY_NOT_OWNED";
pub const VALIDATION_ASSIGNEE: &str = "VALIDATION/ASSIGNEE_NOT_FOUND";
pub const VALIDATION_BULK_ACTION: &str = "VALIDATION/BULK_ACTION";
pub const VALIDATION_BULK_VALUE: &str = "VALIDATION/BULK_VALUE";
pub const VALIDATION_BULK_IDS: &str = "VALIDATION/BULK_IDS";
pub const VALIDATION_CATEGORY_NAME: &str = "VALIDATION/CATEGORY_NAME";
pub const VALIDATION_CATEGORY_NAME_TAKEN: &str = "VALIDATION/CATEGORY_NAME_TAKEN";
pub const VALIDATION_COLOR: &str = "VALIDATION/COLOR";
pub const VALIDATION_EMAIL: &str = "VALIDATION/EMAIL";
pub const VALIDATION_EMAIL_TAKEN: &str = "VALIDATION/EMAIL_TAKEN";
pub const VALIDATION_COMMENT: &str = "VALIDATION/COMMENT";
pub const VALIDATION_ATTACHMENT: &str = "VALIDATION/ATTACHMENT";
pub const VALIDATION_RANGE: &str = "VALIDATION/RANGE";

pub const TITLE_MAX_CHARS: usize = 200;
pub const CATEGORY_NAME_MAX_CHARS: usize = 100;
pub const DEFAULT_CATEGORY_COLOR: &str = "#3B82F6";
pub const ALLOWED_ATTACHMENT_EXTENSIONS: &[&str] =
    &["pdf", "doc", "docx", "txt", "jpg", "jpeg", "png", "gif"];

/// Deserializes a present-but-null field as `Some(None)` so patches can clear values.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl From<ParseEnumError> for AppError {
    fn from(err: ParseEnumError) -> Self {
        let code = match err.kind {
            "status" => VALIDATION_STATUS,
            "priority" => VALIDATION_PRIORITY,
            _ => VALIDATION_BULK_ACTION,
        };
        AppError::new(code, err.to_string()).with_context("value", err.value.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Pending or in progress: the states that can become overdue.
    pub const fn is_open(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(ParseEnumError::new("status", other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            other => Err(ParseEnumError::new("priority", other)),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the operations a bulk request can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Complete,
    Delete,
    ChangePriority,
    ChangeStatus,
}

impl BulkAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            BulkAction::Complete => "complete",
            BulkAction::Delete => "delete",
            BulkAction::ChangePriority => "change_priority",
            BulkAction::ChangeStatus => "change_status",
        }
    }
}

impl FromStr for BulkAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace('-', "_").as_str() {
            "complete" | "mark_complete" => Ok(BulkAction::Complete),
            "delete" => Ok(BulkAction::Delete),
            "change_priority" => Ok(BulkAction::ChangePriority),
            "change_status" => Ok(BulkAction::ChangeStatus),
            _ => Err(ParseEnumError::new("bulk action", s)),
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<NaiveTime>,
    pub completed_at: Option<i64>,
    pub actual_minutes: Option<i64>,
    pub category_id: Option<String>,
    pub assigned_to: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn is_overdue_on(&self, today: NaiveDate) -> bool {
        lifecycle::is_overdue(self.due_date, self.status, today)
    }

    pub fn is_due_today_on(&self, today: NaiveDate) -> bool {
        lifecycle::is_due_today(self.due_date, today)
    }

    pub fn is_overdue(&self) -> bool {
        self.is_overdue_on(crate::time::today())
    }

    pub fn is_due_today(&self) -> bool {
        self.is_due_today_on(crate::time::today())
    }

    /// Read model carrying the derived due-date flags as of `today`.
    pub fn view_on(self, today: NaiveDate) -> TaskView {
        TaskView {
            is_overdue: self.is_overdue_on(today),
            is_due_today: self.is_due_today_on(today),
            task: self,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub is_overdue: bool,
    pub is_due_today: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_time: Option<NaiveTime>,
    #[serde(default)]
    pub actual_minutes: Option<i64>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update. Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_time: Option<Option<NaiveTime>>,
    #[serde(default, deserialize_with = "double_option")]
    pub actual_minutes: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequest {
    pub task_ids: Vec<String>,
    pub action: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub action: BulkAction,
    pub requested: usize,
    pub affected: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub color: String,
    pub icon: String,
    pub is_default: bool,
    pub task_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub created_at: i64,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskComment {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub content: String,
    pub is_internal: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewComment {
    pub content: String,
    #[serde(default)]
    pub is_internal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttachment {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub storage_key: String,
    pub uploaded_at: i64,
}

/// Metadata for a blob already written by the external file store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAttachment {
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub storage_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in TaskStatus::ALL {
            let parsed = TaskStatus::from_str(status.as_str()).expect("parse");
            assert_eq!(parsed, status);
            assert_eq!(parsed.to_string(), status.as_str());
        }
    }

    #[test]
    fn unknown_status_is_validation_error() {
        let err: AppError = TaskStatus::from_str("done").unwrap_err().into();
        assert_eq!(err.code(), VALIDATION_STATUS);
        assert!(err.is_validation());
        assert_eq!(err.context().get("value").map(String::as_str), Some("done"));
    }

    #[test]
    fn unknown_priority_is_validation_error() {
        let err: AppError = TaskPriority::from_str("urgent").unwrap_err().into();
        assert_eq!(err.code(), VALIDATION_PRIORITY);
    }

    #[test]
    fn bulk_action_accepts_aliases() {
        assert_eq!(BulkAction::from_str("complete").unwrap(), BulkAction::Complete);
        assert_eq!(BulkAction::from_str("mark-complete").unwrap(), BulkAction::Complete);
        assert_eq!(
            BulkAction::from_str("change_priority").unwrap(),
            BulkAction::ChangePriority
        );
        let err: AppError = BulkAction::from_str("archive").unwrap_err().into();
        assert_eq!(err.code(), VALIDATION_BULK_ACTION);
    }

    #[test]
    fn patch_distinguishes_null_from_missing() {
        let patch: TaskPatch =
            serde_json::from_value(serde_json::json!({ "due_date": null })).expect("patch");
        assert_eq!(patch.due_date, Some(None));
        assert_eq!(patch.category_id, None);

        let patch: TaskPatch =
            serde_json::from_value(serde_json::json!({ "due_date": "2024-05-01" })).expect("patch");
        assert_eq!(patch.due_date, Some(NaiveDate::from_ymd_opt(2024, 5, 1)));
    }

    #[test]
    fn task_view_serializes_flags_alongside_fields() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let task = Task {
            id: "t1".into(),
            user_id: "u1".into(),
            title: "Write report".into(),
            description: String::new(),
            priority: TaskPriority::High,
            status: TaskStatus::Pending,
            due_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            due_time: None,
            completed_at: None,
            actual_minutes: None,
            category_id: None,
            assigned_to: None,
            created_at: 0,
            updated_at: 0,
        };
        let value = serde_json::to_value(task.view_on(today)).expect("serialize");
        assert_eq!(value["title"], "Write report");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["is_overdue"], true);
        assert_eq!(value["is_due_today"], false);
    }
}
