//! Status transitions and the due-date flags derived from task state.
//!
//! Every path that writes a task status (create, update, quick status set,
//! toggle and bulk) resolves the new `completed_at` through [`transition`], so
//! `status == completed` holds exactly when `completed_at` is set.

use chrono::NaiveDate;

use crate::model::TaskStatus;

/// Current persisted state of a task, or `None` when the task is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Current {
    pub status: TaskStatus,
    pub completed_at: Option<i64>,
}

/// Resolves the `completed_at` value that accompanies a write of `next`.
///
/// Entering `completed` stamps `now_ms`; a task that is already completed
/// keeps its original stamp. Any other status clears it.
pub fn transition(current: Option<Current>, next: TaskStatus, now_ms: i64) -> Option<i64> {
    if next != TaskStatus::Completed {
        return None;
    }
    match current {
        Some(Current {
            status: TaskStatus::Completed,
            completed_at: Some(ts),
        }) => Some(ts),
        _ => Some(now_ms),
    }
}

/// Toggle target: completed tasks reopen as pending, everything else completes.
pub fn toggle_target(status: TaskStatus) -> TaskStatus {
    match status {
        TaskStatus::Completed => TaskStatus::Pending,
        _ => TaskStatus::Completed,
    }
}

pub fn is_overdue(due_date: Option<NaiveDate>, status: TaskStatus, today: NaiveDate) -> bool {
    match due_date {
        Some(due) => due < today && status.is_open(),
        None => false,
    }
}

pub fn is_due_today(due_date: Option<NaiveDate>, today: NaiveDate) -> bool {
    due_date == Some(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn status_strategy() -> impl Strategy<Value = TaskStatus> {
        prop::sample::select(TaskStatus::ALL.to_vec())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn entering_completed_stamps_now() {
        let current = Current {
            status: TaskStatus::Pending,
            completed_at: None,
        };
        assert_eq!(transition(Some(current), TaskStatus::Completed, 42), Some(42));
        assert_eq!(transition(None, TaskStatus::Completed, 7), Some(7));
    }

    #[test]
    fn completed_to_completed_keeps_stamp() {
        let current = Current {
            status: TaskStatus::Completed,
            completed_at: Some(10),
        };
        assert_eq!(transition(Some(current), TaskStatus::Completed, 99), Some(10));
    }

    #[test]
    fn leaving_completed_clears_stamp() {
        let current = Current {
            status: TaskStatus::Completed,
            completed_at: Some(10),
        };
        assert_eq!(transition(Some(current), TaskStatus::Cancelled, 99), None);
        assert_eq!(transition(Some(current), TaskStatus::Pending, 99), None);
    }

    #[test]
    fn yesterday_pending_is_overdue_not_due_today() {
        let today = date(2024, 6, 10);
        let yesterday = date(2024, 6, 9);
        assert!(is_overdue(Some(yesterday), TaskStatus::Pending, today));
        assert!(!is_due_today(Some(yesterday), today));
        assert!(is_due_today(Some(today), today));
        assert!(!is_overdue(Some(today), TaskStatus::Pending, today));
        assert!(!is_overdue(None, TaskStatus::InProgress, today));
    }

    #[test]
    fn toggle_round_trip() {
        assert_eq!(toggle_target(TaskStatus::Pending), TaskStatus::Completed);
        assert_eq!(toggle_target(TaskStatus::Cancelled), TaskStatus::Completed);
        assert_eq!(toggle_target(TaskStatus::Completed), TaskStatus::Pending);
    }

    proptest! {
        #[test]
        fn completed_at_set_iff_completed(
            prev in prop::option::of(status_strategy()),
            next in status_strategy(),
            now in 0i64..4_000_000_000_000,
        ) {
            let current = prev.map(|status| Current {
                status,
                completed_at: (status == TaskStatus::Completed).then_some(1),
            });
            let stamp = transition(current, next, now);
            prop_assert_eq!(stamp.is_some(), next == TaskStatus::Completed);
        }

        #[test]
        fn terminal_statuses_are_never_overdue(offset in -400i64..400) {
            let today = date(2024, 6, 10);
            let due = crate::time::add_days(today, offset);
            prop_assert!(!is_overdue(Some(due), TaskStatus::Completed, today));
            prop_assert!(!is_overdue(Some(due), TaskStatus::Cancelled, today));
        }
    }
}
