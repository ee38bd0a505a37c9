//! Client-side countdown for one member on one task.
//!
//! The controller never decides anything on its own: windows come from the
//! server, and the zero-crossing of the verification countdown only triggers
//! `complete_verification`, which the server re-validates.

use crate::error::AppError;
use crate::state::{VerificationState, remaining_seconds};
use crate::storage::TaskStore;
use crate::verification::{
    CompletionResult, Outcome, UserTaskStatus, VerificationService, VerificationSettings,
    VerificationWindow,
};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

/// Calls the controller makes against the verification service.
pub trait VerificationApi {
    fn start_verification(
        &self,
        task_id: &str,
        user_id: &str,
    ) -> Result<VerificationWindow, AppError>;

    fn complete_verification(
        &self,
        task_id: &str,
        user_id: &str,
        outcome: Outcome,
    ) -> Result<CompletionResult, AppError>;

    fn status(&self, task_id: &str, user_id: &str) -> Result<UserTaskStatus, AppError>;
}

impl<S: TaskStore + ?Sized> VerificationApi for VerificationService<S> {
    fn start_verification(
        &self,
        task_id: &str,
        user_id: &str,
    ) -> Result<VerificationWindow, AppError> {
        VerificationService::start_verification(self, task_id, user_id)
    }

    fn complete_verification(
        &self,
        task_id: &str,
        user_id: &str,
        outcome: Outcome,
    ) -> Result<CompletionResult, AppError> {
        VerificationService::complete_verification(self, task_id, user_id, outcome)
    }

    fn status(&self, task_id: &str, user_id: &str) -> Result<UserTaskStatus, AppError> {
        VerificationService::status(self, task_id, user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    VerificationTick { remaining_seconds: i64 },
    VerificationCompleted(CompletionResult),
    CompletionFailed(AppError),
    /// The countdown ran out but no completion has been acknowledged yet.
    CompletionPending,
    /// The server dropped the attempt without recording a completion.
    VerificationLapsed,
    CooldownTick { remaining_seconds: i64 },
    CooldownFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Countdown {
    started_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

pub struct TimerController<'a, A: VerificationApi + ?Sized> {
    api: &'a A,
    task_id: String,
    user_id: String,
    cooldown: Duration,
    /// How long past expiry the server still accepts the pending completion.
    completion_grace: Duration,
    verification: Option<Countdown>,
    cooldown_until: Option<OffsetDateTime>,
    /// `started_at` of the attempt whose completion has been sent.
    fired_for: Option<OffsetDateTime>,
    /// Server clock minus local clock, measured at the last reconcile.
    skew: Duration,
}

impl<'a, A: VerificationApi + ?Sized> TimerController<'a, A> {
    pub fn new(api: &'a A, task_id: &str, user_id: &str, cooldown: Duration) -> Self {
        Self {
            api,
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            cooldown,
            completion_grace: VerificationSettings::default().completion_grace,
            verification: None,
            cooldown_until: None,
            fired_for: None,
            skew: Duration::ZERO,
        }
    }

    pub fn with_completion_grace(mut self, completion_grace: Duration) -> Self {
        self.completion_grace = completion_grace;
        self
    }

    /// Builds a controller for a freshly mounted view from the server state.
    pub fn resume(
        api: &'a A,
        task_id: &str,
        user_id: &str,
        cooldown: Duration,
        local_now: OffsetDateTime,
    ) -> Result<Self, AppError> {
        let mut controller = Self::new(api, task_id, user_id, cooldown);
        controller.refresh(local_now)?;
        Ok(controller)
    }

    pub fn refresh(&mut self, local_now: OffsetDateTime) -> Result<(), AppError> {
        let status = self.api.status(&self.task_id, &self.user_id)?;
        self.reconcile(&status, local_now);
        Ok(())
    }

    /// Adopts the server's view. Countdowns run to the server-reported
    /// instants, so reloading a page never extends a window.
    pub fn reconcile(&mut self, status: &UserTaskStatus, local_now: OffsetDateTime) {
        self.skew = status.now - local_now;
        match status.state {
            VerificationState::Idle => {
                self.verification = None;
                self.cooldown_until = None;
            }
            VerificationState::Verifying {
                started_at,
                expires_at,
            } => {
                self.verification = Some(Countdown {
                    started_at,
                    expires_at,
                });
                self.cooldown_until = None;
            }
            VerificationState::CoolingDown { available_at, .. } => {
                self.verification = None;
                self.cooldown_until = Some(available_at);
            }
        }
    }

    pub fn is_verifying(&self) -> bool {
        self.verification.is_some()
    }

    pub fn verification_remaining(&self, local_now: OffsetDateTime) -> Option<i64> {
        let now = local_now + self.skew;
        self.verification
            .map(|countdown| remaining_seconds(countdown.expires_at, now))
    }

    pub fn cooldown_remaining(&self, local_now: OffsetDateTime) -> Option<i64> {
        let now = local_now + self.skew;
        self.cooldown_until
            .map(|until| remaining_seconds(until, now))
            .filter(|remaining| *remaining > 0)
    }

    /// Whether the start action should be enabled.
    pub fn can_start(&self, local_now: OffsetDateTime) -> bool {
        self.verification.is_none() && self.cooldown_remaining(local_now).is_none()
    }

    pub fn start(&mut self, local_now: OffsetDateTime) -> Result<VerificationWindow, AppError> {
        if let Some(remaining_seconds) = self.cooldown_remaining(local_now) {
            return Err(AppError::CooldownActive { remaining_seconds });
        }
        if let Some(countdown) = self.verification {
            return Err(AppError::AlreadyVerifying {
                expires_at: countdown.expires_at,
            });
        }

        let window = self.api.start_verification(&self.task_id, &self.user_id)?;
        self.verification = Some(Countdown {
            started_at: window.started_at,
            expires_at: window.expires_at,
        });
        self.cooldown_until = None;
        Ok(window)
    }

    /// Advances both countdowns; called once per second by the view.
    pub fn tick(&mut self, local_now: OffsetDateTime) -> Vec<TimerEvent> {
        let mut events = Vec::new();
        let now = local_now + self.skew;

        if let Some(countdown) = self.verification {
            let remaining = remaining_seconds(countdown.expires_at, now);
            if remaining > 0 {
                events.push(TimerEvent::VerificationTick {
                    remaining_seconds: remaining,
                });
            } else if self.fired_for != Some(countdown.started_at) {
                self.fired_for = Some(countdown.started_at);
                events.push(TimerEvent::VerificationTick {
                    remaining_seconds: 0,
                });
                self.send_completion(local_now, &mut events);
            } else if now < countdown.expires_at + self.completion_grace {
                events.push(TimerEvent::CompletionPending);
            } else {
                // Past the grace window the server decides what happened.
                match self.refresh(local_now) {
                    Ok(()) if self.verification.is_none() && self.cooldown_until.is_none() => {
                        events.push(TimerEvent::VerificationLapsed);
                    }
                    Ok(()) => {}
                    Err(err) => {
                        self.verification = None;
                        events.push(TimerEvent::CompletionFailed(err));
                    }
                }
            }
        }

        if let Some(until) = self.cooldown_until {
            let remaining = remaining_seconds(until, now);
            if remaining > 0 {
                events.push(TimerEvent::CooldownTick {
                    remaining_seconds: remaining,
                });
            } else {
                self.cooldown_until = None;
                events.push(TimerEvent::CooldownFinished);
            }
        }

        events
    }

    /// Re-sends the completion for the current attempt after a transient
    /// failure. Safe because the server answers repeats idempotently.
    pub fn retry_completion(&mut self, local_now: OffsetDateTime) -> Vec<TimerEvent> {
        let mut events = Vec::new();
        if self.verification.is_some() {
            self.send_completion(local_now, &mut events);
        }
        events
    }

    fn send_completion(&mut self, local_now: OffsetDateTime, events: &mut Vec<TimerEvent>) {
        debug!(task_id = %self.task_id, user_id = %self.user_id, "countdown reached zero");
        match self
            .api
            .complete_verification(&self.task_id, &self.user_id, Outcome::Success)
        {
            Ok(result) => {
                self.verification = None;
                if let Some(completed_at) = result.completed_at() {
                    self.cooldown_until = Some(completed_at + self.cooldown);
                }
                events.push(TimerEvent::VerificationCompleted(result));
            }
            Err(err) if err.is_retryable() => {
                warn!(task_id = %self.task_id, error = %err, "completion failed, retry pending");
                events.push(TimerEvent::CompletionFailed(err));
            }
            Err(err) => {
                warn!(task_id = %self.task_id, error = %err, "completion rejected");
                events.push(TimerEvent::CompletionFailed(err));
                // The server no longer has this attempt open; show what it has.
                if let Err(refresh_err) = self.refresh(local_now) {
                    self.verification = None;
                    events.push(TimerEvent::CompletionFailed(refresh_err));
                }
            }
        }
    }
}
