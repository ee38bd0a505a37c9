use crate::clock::Clock;
use crate::error::AppError;
use crate::model::{CompletionRecord, VerificationRecord};
use crate::state::{self, CompleteDecision, VerificationState};
use crate::storage::TaskStore;
use crate::storage::transaction::{self, Mutation};
use serde::Serialize;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationSettings {
    pub verification: Duration,
    pub cooldown: Duration,
    /// How long past `expires_at` a completion is still accepted, and how
    /// long after a completion a repeated call is answered idempotently.
    pub completion_grace: Duration,
    pub max_retries: u32,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            verification: Duration::seconds(60),
            cooldown: Duration::seconds(120),
            completion_grace: Duration::seconds(30),
            max_retries: 5,
        }
    }
}

/// The authoritative window handed back by a successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationWindow {
    pub task_id: String,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CompletionResult {
    Recorded {
        #[serde(with = "time::serde::rfc3339")]
        completed_at: OffsetDateTime,
    },
    /// A retry of a completion that had already been committed.
    AlreadyRecorded {
        #[serde(with = "time::serde::rfc3339")]
        completed_at: OffsetDateTime,
    },
    Abandoned,
}

impl CompletionResult {
    pub fn completed_at(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Recorded { completed_at } | Self::AlreadyRecorded { completed_at } => {
                Some(*completed_at)
            }
            Self::Abandoned => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserTaskStatus {
    pub task_id: String,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub now: OffsetDateTime,
    pub state: VerificationState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub tasks: Vec<SweptTask>,
}

impl SweepReport {
    pub fn reclaimed(&self) -> usize {
        self.tasks.iter().map(|task| task.user_ids.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweptTask {
    pub task_id: String,
    pub user_ids: Vec<String>,
}

/// Owns every write to a task's verification and completion history.
pub struct VerificationService<S: TaskStore + ?Sized> {
    store: Arc<S>,
    clock: Box<dyn Clock>,
    settings: VerificationSettings,
}

impl<S: TaskStore + ?Sized> VerificationService<S> {
    pub fn new(store: Arc<S>, clock: Box<dyn Clock>, settings: VerificationSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> VerificationSettings {
        self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub fn start_verification(
        &self,
        task_id: &str,
        user_id: &str,
    ) -> Result<VerificationWindow, AppError> {
        let task_id = required(task_id, "task id")?;
        let user_id = required(user_id, "user id")?;
        let settings = self.settings;

        let window = transaction::run(self.store.as_ref(), task_id, settings.max_retries, |task| {
            let now = self.clock.now();
            let decision = state::check_start(task, user_id, now, settings.cooldown)?;
            if let Some(lapsed) = decision.reclaimed {
                debug!(
                    task_id,
                    user_id,
                    expired_at = %lapsed.expires_at,
                    "replacing lapsed verification"
                );
            }

            let record = VerificationRecord {
                user_id: user_id.to_string(),
                started_at: now,
                expires_at: now + settings.verification,
            };
            task.in_progress.insert(user_id.to_string(), record.clone());
            task.updated_at = now;

            Ok(Mutation::Write(VerificationWindow {
                task_id: task_id.to_string(),
                user_id: user_id.to_string(),
                started_at: record.started_at,
                expires_at: record.expires_at,
            }))
        })?;

        info!(
            task_id,
            user_id,
            expires_at = %window.expires_at,
            "verification started"
        );
        Ok(window)
    }

    pub fn complete_verification(
        &self,
        task_id: &str,
        user_id: &str,
        outcome: Outcome,
    ) -> Result<CompletionResult, AppError> {
        let task_id = required(task_id, "task id")?;
        let user_id = required(user_id, "user id")?;
        let settings = self.settings;

        let result = transaction::run(self.store.as_ref(), task_id, settings.max_retries, |task| {
            let now = self.clock.now();
            match state::check_complete(task, user_id, now, settings.completion_grace)? {
                CompleteDecision::AlreadyRecorded { completed_at } => Ok(Mutation::Unchanged(
                    CompletionResult::AlreadyRecorded { completed_at },
                )),
                CompleteDecision::Close(_) => {
                    task.in_progress.remove(user_id);
                    task.updated_at = now;
                    match outcome {
                        Outcome::Success => {
                            task.completions.push(CompletionRecord {
                                user_id: user_id.to_string(),
                                completed_at: now,
                                outcome: true,
                            });
                            Ok(Mutation::Write(CompletionResult::Recorded {
                                completed_at: now,
                            }))
                        }
                        Outcome::Failure => Ok(Mutation::Write(CompletionResult::Abandoned)),
                    }
                }
            }
        })?;

        match result {
            CompletionResult::Recorded { completed_at } => {
                info!(task_id, user_id, completed_at = %completed_at, "verification completed")
            }
            CompletionResult::AlreadyRecorded { .. } => {
                info!(task_id, user_id, "completion already recorded, nothing written")
            }
            CompletionResult::Abandoned => info!(task_id, user_id, "verification abandoned"),
        }
        Ok(result)
    }

    /// Server view of one member's state on a task, for reconciling a client
    /// after a reload or reconnect. Plain read; may trail in-flight writes.
    pub fn status(&self, task_id: &str, user_id: &str) -> Result<UserTaskStatus, AppError> {
        let task_id = required(task_id, "task id")?;
        let user_id = required(user_id, "user id")?;
        let stored = self
            .store
            .load(task_id)?
            .ok_or_else(|| AppError::not_found(format!("task {task_id} not found")))?;
        let now = self.clock.now();

        Ok(UserTaskStatus {
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            now,
            state: state::derive_state(&stored.value, user_id, now, self.settings.cooldown),
        })
    }

    /// Drops in-progress records that can no longer be completed. Lapsed
    /// records are abandoned: no completion is written, no cooldown applies.
    pub fn sweep_expired(&self) -> Result<SweepReport, AppError> {
        let grace = self.settings.completion_grace;
        let mut report = SweepReport::default();

        for stored in self.store.list()? {
            let snapshot_now = self.clock.now();
            let has_lapsed = stored
                .value
                .in_progress
                .values()
                .any(|record| record.expires_at + grace <= snapshot_now);
            if !has_lapsed {
                continue;
            }

            let task_id = stored.value.id.as_str();
            let swept = transaction::run(
                self.store.as_ref(),
                task_id,
                self.settings.max_retries,
                |task| {
                    let now = self.clock.now();
                    let lapsed: Vec<String> = task
                        .in_progress
                        .values()
                        .filter(|record| record.expires_at + grace <= now)
                        .map(|record| record.user_id.clone())
                        .collect();
                    if lapsed.is_empty() {
                        return Ok(Mutation::Unchanged(lapsed));
                    }
                    for user_id in &lapsed {
                        task.in_progress.remove(user_id);
                    }
                    task.updated_at = now;
                    Ok(Mutation::Write(lapsed))
                },
            );

            let user_ids = match swept {
                Ok(user_ids) => user_ids,
                // Deleted between the listing and the transaction.
                Err(AppError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            if !user_ids.is_empty() {
                warn!(task_id, count = user_ids.len(), "reclaimed lapsed verifications");
                report.tasks.push(SweptTask {
                    task_id: task_id.to_string(),
                    user_ids,
                });
            }
        }

        Ok(report)
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input(format!("{field} is required")));
    }
    Ok(trimmed)
}
