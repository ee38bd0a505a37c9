use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Like,
    Share,
    Comment,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Share => "share",
            Self::Comment => "comment",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "like" => Some(Self::Like),
            "share" => Some(Self::Share),
            "comment" => Some(Self::Comment),
            _ => None,
        }
    }
}

/// An open verification attempt. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl VerificationRecord {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    pub outcome: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub target_link: String,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub active_from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub active_until: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub completions: Vec<CompletionRecord>,
    /// Keyed by user id: at most one open attempt per member.
    #[serde(default)]
    pub in_progress: BTreeMap<String, VerificationRecord>,
}

impl Task {
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.active_from <= now && now < self.active_until
    }

    pub fn is_eligible_department(&self, department: &str) -> bool {
        self.departments.is_empty()
            || self
                .departments
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(department))
    }

    pub fn verification_for(&self, user_id: &str) -> Option<&VerificationRecord> {
        self.in_progress.get(user_id)
    }

    /// Most recent successful completion; it alone bounds the cooldown.
    pub fn latest_completion_for(&self, user_id: &str) -> Option<&CompletionRecord> {
        self.completions
            .iter()
            .filter(|record| record.user_id == user_id && record.outcome)
            .max_by_key(|record| record.completed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::{CompletionRecord, Task, TaskKind};
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn sample_task() -> Task {
        Task {
            id: "task-1".to_string(),
            title: "Like the launch post".to_string(),
            description: String::new(),
            kind: TaskKind::Like,
            target_link: "https://example.org/post/1".to_string(),
            departments: vec!["Marketing".to_string()],
            active_from: datetime!(2025-12-20 00:00 UTC),
            active_until: datetime!(2025-12-21 00:00 UTC),
            created_at: datetime!(2025-12-19 12:00 UTC),
            updated_at: datetime!(2025-12-19 12:00 UTC),
            completions: Vec::new(),
            in_progress: BTreeMap::new(),
        }
    }

    #[test]
    fn active_window_is_half_open() {
        let task = sample_task();
        assert!(task.is_active_at(datetime!(2025-12-20 00:00 UTC)));
        assert!(task.is_active_at(datetime!(2025-12-20 23:59:59 UTC)));
        assert!(!task.is_active_at(datetime!(2025-12-21 00:00 UTC)));
        assert!(!task.is_active_at(datetime!(2025-12-19 23:59:59 UTC)));
    }

    #[test]
    fn department_match_ignores_case() {
        let mut task = sample_task();
        assert!(task.is_eligible_department("marketing"));
        assert!(!task.is_eligible_department("finance"));

        task.departments.clear();
        assert!(task.is_eligible_department("finance"));
    }

    #[test]
    fn latest_completion_picks_newest_success() {
        let mut task = sample_task();
        task.completions = vec![
            CompletionRecord {
                user_id: "u1".to_string(),
                completed_at: datetime!(2025-12-20 10:00 UTC),
                outcome: true,
            },
            CompletionRecord {
                user_id: "u1".to_string(),
                completed_at: datetime!(2025-12-20 11:00 UTC),
                outcome: true,
            },
            CompletionRecord {
                user_id: "u2".to_string(),
                completed_at: datetime!(2025-12-20 12:00 UTC),
                outcome: true,
            },
        ];

        let latest = task.latest_completion_for("u1").unwrap();
        assert_eq!(latest.completed_at, datetime!(2025-12-20 11:00 UTC));
        assert!(task.latest_completion_for("u3").is_none());
    }

    #[test]
    fn kind_parses_known_labels() {
        assert_eq!(TaskKind::parse(" Share "), Some(TaskKind::Share));
        assert_eq!(TaskKind::parse("retweet"), None);
        assert_eq!(TaskKind::Comment.label(), "comment");
    }
}
