use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::db::{run_in_tx, wrap_unexpected};
use crate::id::new_uuid_v7;
use crate::op_log::LogScope;
use crate::time::now_ms;
use crate::AppResult;

/// `(name, color, icon)` of the standard category set.
pub const DEFAULT_CATEGORIES: &[(&str, &str, &str)] = &[
    ("Work", "#3b82f6", "briefcase"),
    ("Personal", "#10b981", "user"),
    ("Health", "#ef4444", "heart"),
    ("Learning", "#8b5cf6", "book"),
    ("Finance", "#f59e0b", "dollar"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeededCategory {
    pub name: String,
    pub created: bool,
}

/// Creates any missing default categories for `user_id`. Existing categories
/// with the same name are left untouched.
pub async fn seed_default_categories(
    pool: &SqlitePool,
    user_id: &str,
) -> AppResult<Vec<SeededCategory>> {
    let scope = LogScope::new("categories_seed_defaults", Some(user_id));
    let owner = user_id.to_string();
    let result = run_in_tx(pool, |tx| {
        async move {
            let now = now_ms();
            let mut seeded = Vec::with_capacity(DEFAULT_CATEGORIES.len());
            for (name, color, icon) in DEFAULT_CATEGORIES {
                let done = sqlx::query(
                    "INSERT INTO categories \
                     (id, user_id, name, description, color, icon, is_default, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, '', ?4, ?5, 1, ?6, ?6) \
                     ON CONFLICT(user_id, name) DO NOTHING",
                )
                .bind(new_uuid_v7())
                .bind(&owner)
                .bind(*name)
                .bind(*color)
                .bind(*icon)
                .bind(now)
                .execute(&mut **tx)
                .await
                .map_err(|err| wrap_unexpected(err.into(), "categories_seed_insert"))?;
                seeded.push(SeededCategory {
                    name: (*name).to_string(),
                    created: done.rows_affected() == 1,
                });
            }
            Ok(seeded)
        }
        .boxed()
    })
    .await;
    scope.finish(result, |seeded| {
        json!({ "created": seeded.iter().filter(|s| s.created).count() })
    })
}
