use acta_lib::analytics;
use acta_lib::categories;
use acta_lib::model::{NewCategory, VALIDATION_RANGE};
use acta_lib::time::add_days;
use anyhow::Result;
use chrono::NaiveDate;

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn overview_counts_live_state() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let other = util::user(&pool, "ben@example.com").await;
    let today = util::date(2024, 5, 15);

    for hour in 0..4 {
        util::insert_task(
            &pool,
            &user,
            "completed",
            util::at(today, hour),
            Some(util::at(today, hour + 1)),
            None,
            None,
        )
        .await;
    }
    util::insert_task(
        &pool,
        &user,
        "pending",
        util::at(today, 5),
        None,
        Some(add_days(today, -1)),
        None,
    )
    .await;
    util::insert_task(&pool, &user, "in_progress", util::at(today, 6), None, Some(today), None)
        .await;
    for hour in 7..11 {
        util::insert_task(&pool, &user, "pending", util::at(today, hour), None, None, None).await;
    }
    util::insert_task(&pool, &other, "completed", util::at(today, 9), Some(util::at(today, 10)), None, None)
        .await;

    let stats = analytics::overview_at(&pool, &user, today).await?;
    assert_eq!(stats.total_tasks, 10);
    assert_eq!(stats.completed_tasks, 4);
    assert_eq!(stats.pending_tasks, 5);
    assert_eq!(stats.in_progress_tasks, 1);
    assert_eq!(stats.cancelled_tasks, 0);
    assert_eq!(stats.overdue_tasks, 1);
    assert_eq!(stats.due_today, 1);
    assert_eq!(stats.tasks_this_week, 10);
    assert_eq!(stats.completed_this_week, 4);
    assert_eq!(stats.completion_rate, 40.0);
    assert_eq!(stats.productivity_score, 40.0);
    Ok(())
}

#[tokio::test]
async fn overview_of_empty_store_is_zero() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;

    let stats = analytics::overview_at(&pool, &user, util::date(2024, 5, 15)).await?;
    assert_eq!(stats.total_tasks, 0);
    assert_eq!(stats.completion_rate, 0.0);
    Ok(())
}

#[tokio::test]
async fn trend_covers_each_day_oldest_first() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let today = util::date(2024, 5, 15);
    let yesterday = add_days(today, -1);

    util::insert_task(&pool, &user, "pending", util::at(yesterday, 9), None, None, None).await;
    util::insert_task(
        &pool,
        &user,
        "completed",
        util::at(yesterday, 10),
        Some(util::at(today, 8)),
        None,
        None,
    )
    .await;

    let trend = analytics::productivity_trend_at(&pool, &user, 3, today).await?;
    let dates: Vec<_> = trend.iter().map(|p| p.date).collect();
    assert_eq!(dates, vec![add_days(today, -2), yesterday, today]);
    assert_eq!(trend[1].tasks_created, 2);
    assert_eq!(trend[1].tasks_completed, 0);
    assert_eq!(trend[2].tasks_created, 0);
    assert_eq!(trend[2].tasks_completed, 1);
    assert_eq!(trend[2].completion_rate, 0.0);

    for days in [0, 366] {
        let err = analytics::productivity_trend_at(&pool, &user, days, today)
            .await
            .unwrap_err();
        assert_eq!(err.code(), VALIDATION_RANGE);
    }
    let err = analytics::productivity_trend_at(&pool, &user, 3, NaiveDate::MAX)
        .await
        .unwrap_err();
    assert_eq!(err.code(), VALIDATION_RANGE);
    Ok(())
}

#[tokio::test]
async fn trend_rate_may_exceed_one_hundred_but_score_is_capped() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let today = util::date(2024, 5, 15);
    let last_week = add_days(today, -7);

    util::insert_task(&pool, &user, "pending", util::at(today, 8), None, None, None).await;
    for hour in [9, 10] {
        util::insert_task(
            &pool,
            &user,
            "completed",
            util::at(last_week, hour),
            Some(util::at(today, hour)),
            None,
            None,
        )
        .await;
    }

    let trend = analytics::productivity_trend_at(&pool, &user, 1, today).await?;
    assert_eq!(trend.len(), 1);
    assert_eq!(trend[0].tasks_created, 1);
    assert_eq!(trend[0].tasks_completed, 2);
    assert_eq!(trend[0].completion_rate, 200.0);
    assert_eq!(trend[0].productivity_score, 100.0);
    Ok(())
}

#[tokio::test]
async fn category_stats_include_empty_categories() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let today = util::date(2024, 5, 15);
    let named = |name: &str| NewCategory {
        name: name.into(),
        ..Default::default()
    };
    let work = categories::create_category(&pool, &user, named("Work")).await?;
    categories::create_category(&pool, &user, named("Home")).await?;

    util::insert_task(
        &pool,
        &user,
        "completed",
        util::at(today, 8),
        Some(util::at(today, 9)),
        None,
        Some(&work.id),
    )
    .await;
    util::insert_task(
        &pool,
        &user,
        "pending",
        util::at(today, 8),
        None,
        Some(add_days(today, -3)),
        Some(&work.id),
    )
    .await;

    let stats = analytics::category_stats_at(&pool, &user, today).await?;
    let names: Vec<&str> = stats.iter().map(|s| s.category_name.as_str()).collect();
    assert_eq!(names, vec!["Home", "Work"]);

    assert_eq!(stats[0].total_tasks, 0);
    assert_eq!(stats[0].completion_rate, 0.0);

    let work_stats = &stats[1];
    assert_eq!(work_stats.category_id, work.id);
    assert_eq!(work_stats.total_tasks, 2);
    assert_eq!(work_stats.completed_tasks, 1);
    assert_eq!(work_stats.pending_tasks, 1);
    assert_eq!(work_stats.overdue_tasks, 1);
    assert_eq!(work_stats.completion_rate, 50.0);
    Ok(())
}
