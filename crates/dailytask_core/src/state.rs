//! Per `(task, user)` verification state machine.
//!
//! ```text
//! Idle --start (cooldown elapsed)--> Verifying
//! Verifying --complete(success)--> CoolingDown
//! Verifying --complete(failure) | window lapses--> Idle
//! CoolingDown --cooldown elapses--> Idle
//! ```
//!
//! Nothing here is stored: the state is recomputed from the task document,
//! the user id and the server clock every time it is needed.

use crate::error::AppError;
use crate::model::{Task, VerificationRecord};
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerificationState {
    Idle,
    Verifying {
        #[serde(with = "time::serde::rfc3339")]
        started_at: OffsetDateTime,
        #[serde(with = "time::serde::rfc3339")]
        expires_at: OffsetDateTime,
    },
    CoolingDown {
        #[serde(with = "time::serde::rfc3339")]
        completed_at: OffsetDateTime,
        #[serde(with = "time::serde::rfc3339")]
        available_at: OffsetDateTime,
    },
}

impl VerificationState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Verifying { .. } => "verifying",
            Self::CoolingDown { .. } => "cooling_down",
        }
    }
}

pub fn derive_state(
    task: &Task,
    user_id: &str,
    now: OffsetDateTime,
    cooldown: Duration,
) -> VerificationState {
    if let Some(record) = task.verification_for(user_id)
        && record.is_live(now)
    {
        return VerificationState::Verifying {
            started_at: record.started_at,
            expires_at: record.expires_at,
        };
    }

    if let Some(latest) = task.latest_completion_for(user_id) {
        let available_at = latest.completed_at + cooldown;
        if available_at > now {
            return VerificationState::CoolingDown {
                completed_at: latest.completed_at,
                available_at,
            };
        }
    }

    VerificationState::Idle
}

/// Whole seconds left until `until`, rounded up; zero once it has passed.
pub fn remaining_seconds(until: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let left = until - now;
    if left <= Duration::ZERO {
        return 0;
    }
    let whole = left.whole_seconds();
    if left.subsec_nanoseconds() > 0 {
        whole + 1
    } else {
        whole
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartDecision {
    /// Lapsed record being superseded by the new attempt, if any.
    pub reclaimed: Option<VerificationRecord>,
}

pub fn check_start(
    task: &Task,
    user_id: &str,
    now: OffsetDateTime,
    cooldown: Duration,
) -> Result<StartDecision, AppError> {
    if !task.is_active_at(now) {
        debug!(task_id = %task.id, user_id, "start rejected: task inactive");
        return Err(AppError::TaskInactive(format!(
            "task {} is not active at {}",
            task.id, now
        )));
    }

    match derive_state(task, user_id, now, cooldown) {
        VerificationState::Verifying { expires_at, .. } => {
            debug!(task_id = %task.id, user_id, "start rejected: already verifying");
            Err(AppError::AlreadyVerifying { expires_at })
        }
        VerificationState::CoolingDown { available_at, .. } => {
            let remaining_seconds = remaining_seconds(available_at, now);
            debug!(task_id = %task.id, user_id, remaining_seconds, "start rejected: cooldown");
            Err(AppError::CooldownActive { remaining_seconds })
        }
        VerificationState::Idle => Ok(StartDecision {
            reclaimed: task.verification_for(user_id).cloned(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteDecision {
    /// Close this open attempt.
    Close(VerificationRecord),
    /// The attempt was already closed by a completion at this instant; the
    /// call is a retry and must not write again.
    AlreadyRecorded { completed_at: OffsetDateTime },
}

pub fn check_complete(
    task: &Task,
    user_id: &str,
    now: OffsetDateTime,
    grace: Duration,
) -> Result<CompleteDecision, AppError> {
    if let Some(record) = task.verification_for(user_id) {
        if now < record.expires_at + grace {
            return Ok(CompleteDecision::Close(record.clone()));
        }
        debug!(task_id = %task.id, user_id, "complete rejected: attempt lapsed");
        return Err(AppError::NoActiveVerification);
    }

    if let Some(latest) = task.latest_completion_for(user_id) {
        let age = now - latest.completed_at;
        if age >= Duration::ZERO && age <= grace {
            return Ok(CompleteDecision::AlreadyRecorded {
                completed_at: latest.completed_at,
            });
        }
    }

    debug!(task_id = %task.id, user_id, "complete rejected: nothing in progress");
    Err(AppError::NoActiveVerification)
}
