use serde::Serialize;
use time::OffsetDateTime;

use super::document::UserRecord;
use crate::model::{ProductivityStats, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub cancelled: usize,
    pub overdue: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub user_id: String,
    pub productivity: ProductivityStats,
    pub tasks: TaskCounts,
    pub total_sessions: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_session: Option<OffsetDateTime>,
    pub streak_days: u32,
    pub tasks_completed_today: u32,
    pub total_focus_time: u32,
    pub total_focus_time_today: u32,
    pub feedback_count: usize,
}

pub fn build_report(user_id: &str, record: &UserRecord, now: OffsetDateTime) -> AnalyticsReport {
    let session = &record.session;
    let mut counts = TaskCounts::default();
    for task in session.tasks() {
        counts.total += 1;
        match task.status {
            TaskStatus::Pending => counts.pending += 1,
            TaskStatus::InProgress => counts.in_progress += 1,
            TaskStatus::Done => counts.done += 1,
            TaskStatus::Cancelled => counts.cancelled += 1,
        }
        if task.is_overdue(now) {
            counts.overdue += 1;
        }
    }

    AnalyticsReport {
        user_id: user_id.to_string(),
        productivity: session.productivity_stats_at(now),
        tasks: counts,
        total_sessions: record.analytics.total_sessions,
        last_session: record.analytics.last_session,
        streak_days: session.streak_days(),
        tasks_completed_today: session.tasks_completed_today(),
        total_focus_time: session.total_focus_time(),
        total_focus_time_today: session.total_focus_time_today(),
        feedback_count: record.feedback.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::build_report;
    use crate::model::{Task, TaskStatus, UserSession};
    use crate::storage::document::UserRecord;
    use time::macros::datetime;

    #[test]
    fn counts_tasks_by_status() {
        let now = datetime!(2025-12-20 12:00 UTC);
        let mut session = UserSession::new_at("u1", now);
        let mut done = Task::new_at("done", "", now);
        done.status = TaskStatus::Done;
        let late = Task::new_at("late", "", now).with_deadline(datetime!(2025-12-19 12:00 UTC));
        session.replace_tasks(vec![done, late, Task::new_at("open", "", now)]);

        let report = build_report("u1", &UserRecord::new(session), now);

        assert_eq!(report.tasks.total, 3);
        assert_eq!(report.tasks.done, 1);
        assert_eq!(report.tasks.pending, 2);
        assert_eq!(report.tasks.overdue, 1);
        assert_eq!(report.productivity.total_completions, 0);
        assert_eq!(report.feedback_count, 0);
    }
}
