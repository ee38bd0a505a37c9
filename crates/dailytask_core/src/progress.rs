//! Read-side completion overview. Works on whatever snapshot it is handed;
//! it is informational and never feeds back into the verification protocol.

use crate::model::{Member, Task};
use serde::Serialize;
use time::{Duration, OffsetDateTime, Time, UtcOffset};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberStatus {
    pub id: String,
    pub display_name: String,
    pub department: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    pub eligible: usize,
    pub completed: usize,
    pub percentage: f64,
    pub completed_members: Vec<MemberStatus>,
    pub pending_members: Vec<MemberStatus>,
}

/// The UTC calendar day containing `now`, as a half-open range.
pub fn current_period(now: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    let start = now.to_offset(UtcOffset::UTC).replace_time(Time::MIDNIGHT);
    (start, start + Duration::days(1))
}

pub fn task_progress(task: &Task, members: &[Member], now: OffsetDateTime) -> TaskProgress {
    let (period_start, period_end) = current_period(now);
    let mut completed_members = Vec::new();
    let mut pending_members = Vec::new();

    for member in members
        .iter()
        .filter(|member| task.is_eligible_department(&member.department))
    {
        let completed_at = task
            .completions
            .iter()
            .filter(|record| {
                record.user_id == member.id
                    && record.outcome
                    && record.completed_at >= period_start
                    && record.completed_at < period_end
            })
            .map(|record| record.completed_at)
            .max();

        let status = MemberStatus {
            id: member.id.clone(),
            display_name: member.display_name.clone(),
            department: member.department.clone(),
            completed_at,
        };
        if completed_at.is_some() {
            completed_members.push(status);
        } else {
            pending_members.push(status);
        }
    }

    let eligible = completed_members.len() + pending_members.len();
    let completed = completed_members.len();
    let percentage = if eligible == 0 {
        0.0
    } else {
        completed as f64 * 100.0 / eligible as f64
    };

    TaskProgress {
        task_id: task.id.clone(),
        title: task.title.clone(),
        period_start,
        period_end,
        eligible,
        completed,
        percentage,
        completed_members,
        pending_members,
    }
}

pub fn overview(tasks: &[Task], members: &[Member], now: OffsetDateTime) -> Vec<TaskProgress> {
    tasks
        .iter()
        .map(|task| task_progress(task, members, now))
        .collect()
}
