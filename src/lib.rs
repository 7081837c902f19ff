//! Task-management backend: tasks with categories, comments and attachments,
//! plus daily and weekly analytics rollups.
//!
//! Every store operation takes the caller's `user_id` explicitly; records owned
//! by someone else behave exactly like records that do not exist.

pub mod analytics;
pub mod attachments;
pub mod categories;
pub mod comments;
pub mod config;
pub mod db;
pub mod defaults;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod op_log;
pub mod tasks;
pub mod time;
pub mod users;

pub use error::{AppError, AppResult};

/// Git commit the binary was built from, when known.
pub const GIT_HASH: Option<&str> = option_env!("ACTA_GIT_HASH");

/// Installs the JSON tracing subscriber with the configured filter.
pub fn init_logging(filter: &str) {
    logging::init(filter);
}
