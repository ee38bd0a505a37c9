use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("invalid_input - {0}")]
    InvalidInput(String),
    #[error("invalid_data - {0}")]
    InvalidData(String),
    #[error("io_error - {0}")]
    Io(String),
    #[error("not_found - {0}")]
    NotFound(String),
    #[error("task_inactive - {0}")]
    TaskInactive(String),
    #[error("already_verifying - verification in progress until {expires_at}")]
    AlreadyVerifying { expires_at: OffsetDateTime },
    #[error("cooldown_active - try again in {remaining_seconds}s")]
    CooldownActive { remaining_seconds: i64 },
    #[error("no_active_verification - no verification in progress")]
    NoActiveVerification,
    #[error("transaction_conflict - gave up after {attempts} attempts")]
    Conflict { attempts: u32 },
    #[error("permission_denied - {0}")]
    PermissionDenied(String),
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn io<M: Into<String>>(message: M) -> Self {
        Self::Io(message.into())
    }

    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::NotFound(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidData(_) => "invalid_data",
            Self::Io(_) => "io_error",
            Self::NotFound(_) => "not_found",
            Self::TaskInactive(_) => "task_inactive",
            Self::AlreadyVerifying { .. } => "already_verifying",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::NoActiveVerification => "no_active_verification",
            Self::Conflict { .. } => "transaction_conflict",
            Self::PermissionDenied(_) => "permission_denied",
        }
    }

    pub fn message(&self) -> String {
        let rendered = self.to_string();
        match rendered.split_once(" - ") {
            Some((_, message)) => message.to_string(),
            None => rendered,
        }
    }

    /// Transient failures that are safe to retry as-is. Precondition errors
    /// only clear once the stated condition changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Conflict { .. })
    }

    /// Seconds the caller has to wait before the same call can succeed.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        match self {
            Self::CooldownActive { remaining_seconds } => Some(*remaining_seconds),
            _ => None,
        }
    }
}
