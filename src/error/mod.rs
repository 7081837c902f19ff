//! Error type returned by every store operation.
//!
//! Codes are `AREA/REASON` strings such as `TASK/NOT_FOUND`,
//! `VALIDATION/TITLE` or `ANALYTICS/STORE_UNAVAILABLE`. Storage failures keep
//! the driver error as `cause`, so the SQLite result code survives into logs.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use sqlx::Error as SqlxError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppError {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    context: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

const VALIDATION_PREFIX: &str = "VALIDATION/";
const NOT_FOUND_SUFFIX: &str = "/NOT_FOUND";

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Caller mistakes: a bad field, an unknown enum value or bulk action.
    pub fn is_validation(&self) -> bool {
        self.code.starts_with(VALIDATION_PREFIX)
    }

    /// The record is missing or belongs to another user.
    pub fn is_not_found(&self) -> bool {
        self.code.ends_with(NOT_FOUND_SUFFIX)
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let mut keys: Vec<_> = self.context.keys().collect();
            keys.sort();
            let pairs: Vec<String> = keys
                .into_iter()
                .map(|key| format!("{key}={}", self.context[key]))
                .collect();
            write!(f, " ({})", pairs.join(", "))?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " cause={}", cause.code)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() || error.is_eof() {
            "JSON/SYNTAX"
        } else {
            "JSON/ERROR"
        };
        AppError::new(code, error.to_string())
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            SqlxError::Io(err) => AppError::new(format!("IO/{:?}", err.kind()), err.to_string()),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                AppError::new(code, db.message().to_string())
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column", index)
            }
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

/// True when SQLite rejected a write on a UNIQUE index or primary key.
pub(crate) fn is_unique_violation(error: &SqlxError) -> bool {
    matches!(error, SqlxError::Database(db) if db.is_unique_violation())
}
