use acta_lib::model::{
    BulkAction, BulkRequest, NewTask, TaskPriority, TaskStatus, TASK_NOT_FOUND,
    VALIDATION_BULK_ACTION, VALIDATION_BULK_IDS, VALIDATION_BULK_VALUE,
};
use acta_lib::tasks;
use anyhow::Result;
use sqlx::SqlitePool;

#[path = "util.rs"]
mod util;

fn request(ids: &[&str], action: &str, value: Option<&str>) -> BulkRequest {
    BulkRequest {
        task_ids: ids.iter().map(|id| id.to_string()).collect(),
        action: action.into(),
        value: value.map(str::to_string),
    }
}

async fn make_tasks(pool: &SqlitePool, user: &str, count: usize) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let task = tasks::create_task(pool, user, NewTask::titled(format!("Task {n}"))).await?;
        ids.push(task.id);
    }
    Ok(ids)
}

#[tokio::test]
async fn bulk_complete_skips_foreign_tasks() -> Result<()> {
    let pool = util::temp_pool().await;
    let mine = util::user(&pool, "mine@example.com").await;
    let theirs = util::user(&pool, "theirs@example.com").await;
    let own = make_tasks(&pool, &mine, 2).await?;
    let foreign = make_tasks(&pool, &theirs, 1).await?;

    let outcome = tasks::bulk_action(
        &pool,
        &mine,
        request(&[&own[0], &own[1], &foreign[0]], "complete", None),
    )
    .await?;
    assert_eq!(outcome.action, BulkAction::Complete);
    assert_eq!(outcome.requested, 3);
    assert_eq!(outcome.affected, 2);

    for id in &own {
        let task = tasks::get_task(&pool, &mine, id).await?;
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }
    let untouched = tasks::get_task(&pool, &theirs, &foreign[0]).await?;
    assert_eq!(untouched.status, TaskStatus::Pending);
    assert_eq!(untouched.completed_at, None);
    Ok(())
}

#[tokio::test]
async fn bulk_change_status_reopens_completed_tasks() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let ids = make_tasks(&pool, &user, 2).await?;
    tasks::set_status(&pool, &user, &ids[0], TaskStatus::Completed).await?;

    let outcome = tasks::bulk_action(
        &pool,
        &user,
        request(&[&ids[0], &ids[1]], "change_status", Some("in_progress")),
    )
    .await?;
    assert_eq!(outcome.affected, 2);

    for id in &ids {
        let task = tasks::get_task(&pool, &user, id).await?;
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.completed_at, None);
    }
    Ok(())
}

#[tokio::test]
async fn bulk_change_priority_leaves_status_alone() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let ids = make_tasks(&pool, &user, 1).await?;
    let done = tasks::set_status(&pool, &user, &ids[0], TaskStatus::Completed).await?;

    tasks::bulk_action(
        &pool,
        &user,
        request(&[&ids[0]], "change_priority", Some("high")),
    )
    .await?;
    let task = tasks::get_task(&pool, &user, &ids[0]).await?;
    assert_eq!(task.priority, TaskPriority::High);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completed_at, done.completed_at);
    Ok(())
}

#[tokio::test]
async fn bulk_delete_only_removes_own_tasks() -> Result<()> {
    let pool = util::temp_pool().await;
    let mine = util::user(&pool, "mine@example.com").await;
    let theirs = util::user(&pool, "theirs@example.com").await;
    let own = make_tasks(&pool, &mine, 1).await?;
    let foreign = make_tasks(&pool, &theirs, 1).await?;

    let outcome = tasks::bulk_action(
        &pool,
        &mine,
        request(&[&own[0], &foreign[0], "does-not-exist"], "delete", None),
    )
    .await?;
    assert_eq!(outcome.affected, 1);

    let err = tasks::get_task(&pool, &mine, &own[0]).await.unwrap_err();
    assert_eq!(err.code(), TASK_NOT_FOUND);
    assert!(tasks::get_task(&pool, &theirs, &foreign[0]).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn duplicate_ids_count_once() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let ids = make_tasks(&pool, &user, 1).await?;

    let outcome = tasks::bulk_action(
        &pool,
        &user,
        request(&[&ids[0], &ids[0], " "], "mark-complete", None),
    )
    .await?;
    assert_eq!(outcome.requested, 1);
    assert_eq!(outcome.affected, 1);
    Ok(())
}

#[tokio::test]
async fn invalid_requests_change_nothing() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let ids = make_tasks(&pool, &user, 1).await?;

    let err = tasks::bulk_action(&pool, &user, request(&[&ids[0]], "archive", None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), VALIDATION_BULK_ACTION);

    let err = tasks::bulk_action(&pool, &user, request(&[&ids[0]], "change_status", None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), VALIDATION_BULK_VALUE);

    let err = tasks::bulk_action(
        &pool,
        &user,
        request(&[&ids[0]], "change_priority", Some("urgent")),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), VALIDATION_BULK_VALUE);

    let err = tasks::bulk_action(&pool, &user, request(&[], "complete", None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), VALIDATION_BULK_IDS);

    let task = tasks::get_task(&pool, &user, &ids[0]).await?;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, TaskPriority::Medium);
    Ok(())
}
