use acta_lib::migrate::{apply_migrations, migration_status};
use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn fresh_database_reports_pending_then_applied() -> Result<()> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    let before = migration_status(&pool).await?;
    assert!(!before.is_empty());
    assert!(before.iter().all(|m| m.applied_at.is_none()));

    apply_migrations(&pool).await?;
    let after = migration_status(&pool).await?;
    assert_eq!(after.len(), before.len());
    assert!(after.iter().all(|m| m.applied_at.is_some()));
    Ok(())
}

#[tokio::test]
async fn applying_twice_is_a_no_op() -> Result<()> {
    let pool = util::temp_pool().await;
    apply_migrations(&pool).await?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await?;
    assert_eq!(applied, migration_status(&pool).await?.len() as i64);
    Ok(())
}

#[tokio::test]
async fn edited_migration_is_rejected() -> Result<()> {
    let pool = util::temp_pool().await;
    sqlx::query("UPDATE schema_migrations SET checksum = 'tampered'")
        .execute(&pool)
        .await?;

    let err = apply_migrations(&pool).await.unwrap_err();
    assert!(err.to_string().contains("edited after application"));
    Ok(())
}

#[tokio::test]
async fn schema_enforces_status_completed_at_pairing() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;

    let res = sqlx::query(
        "INSERT INTO tasks (id, user_id, title, status, completed_at, created_at, updated_at) \
         VALUES ('t1', ?1, 'broken', 'pending', 5, 0, 0)",
    )
    .bind(&user)
    .execute(&pool)
    .await;
    assert!(res.is_err());

    let res = sqlx::query(
        "INSERT INTO tasks (id, user_id, title, status, completed_at, created_at, updated_at) \
         VALUES ('t2', ?1, 'broken', 'completed', NULL, 0, 0)",
    )
    .bind(&user)
    .execute(&pool)
    .await;
    assert!(res.is_err());
    Ok(())
}
