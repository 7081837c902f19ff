#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex as StdMutex};

use acta_lib::analytics;
use acta_lib::model::{NewTask, TASK_NOT_FOUND};
use acta_lib::tasks::{self, Page};
use anyhow::Result;
use serde_json::Value;
use tracing::subscriber::{self, DefaultGuard};
use tracing_subscriber::{fmt, EnvFilter};

#[path = "util.rs"]
mod util;

struct BufferWriter(Arc<StdMutex<Vec<u8>>>);

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn init_buffer_subscriber() -> (Arc<StdMutex<Vec<u8>>>, DefaultGuard) {
    let buffer: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("acta=info"))
        .with_writer(move || BufferWriter(writer.clone()))
        .json()
        .finish();
    let guard = subscriber::set_default(subscriber);
    (buffer, guard)
}

/// `(level, cmd)` for every scope record in the buffer.
fn scope_records(buffer: &Arc<StdMutex<Vec<u8>>>) -> Vec<(String, String)> {
    let raw = String::from_utf8(buffer.lock().unwrap().clone()).expect("log utf8");
    raw.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|record| {
            let cmd = record["fields"]["cmd"].as_str()?.to_string();
            let level = record["level"].as_str()?.to_string();
            Some((level, cmd))
        })
        .collect()
}

#[tokio::test]
async fn reads_are_logged_like_writes() -> Result<()> {
    let pool = util::temp_pool().await;
    let user = util::user(&pool, "ana@example.com").await;
    let task = tasks::create_task(&pool, &user, NewTask::titled("Read me")).await?;
    let day = util::date(2024, 5, 15);

    let (buffer, _guard) = init_buffer_subscriber();
    tasks::get_task(&pool, &user, &task.id).await?;
    tasks::list_tasks(&pool, &user, Page::new(20, 0)).await?;
    analytics::overview_at(&pool, &user, day).await?;
    analytics::productivity_trend_at(&pool, &user, 7, day).await?;
    analytics::category_stats_at(&pool, &user, day).await?;
    analytics::list_daily_stats(&pool, &user, day, day).await?;
    analytics::list_weekly_stats(&pool, &user, day, day).await?;
    let err = tasks::get_task(&pool, &user, "missing").await.unwrap_err();
    assert_eq!(err.code(), TASK_NOT_FOUND);

    let records = scope_records(&buffer);
    for cmd in [
        "tasks_get",
        "tasks_list",
        "analytics_overview",
        "analytics_trend",
        "analytics_category_stats",
        "analytics_list_daily",
        "analytics_list_weekly",
    ] {
        assert!(
            records.iter().any(|(level, c)| level == "INFO" && c == cmd),
            "no success record for {cmd}: {records:?}"
        );
    }
    assert!(records
        .iter()
        .any(|(level, c)| level == "WARN" && c == "tasks_get"));
    Ok(())
}
