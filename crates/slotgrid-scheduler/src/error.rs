//! Scheduler error types.

use thiserror::Error;

use slotgrid_core::CoreError;
use slotgrid_placement::SelectionError;
use slotgrid_state::StateError;

/// Why a workload may not proceed this cycle. Always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionError {
    #[error("{0}")]
    ConcurrencyLimitExceeded(String),

    #[error("{0}")]
    KeypairResourceQuotaExceeded(String),

    #[error("{0}")]
    UserResourceQuotaExceeded(String),

    #[error("{0}")]
    GroupResourceQuotaExceeded(String),

    #[error("{0}")]
    DomainResourceQuotaExceeded(String),

    #[error("{0}")]
    PendingSessionCountLimitExceeded(String),

    #[error("{0}")]
    PendingSessionResourceLimitExceeded(String),

    #[error("{0}")]
    DependenciesNotSatisfied(String),

    /// Several rules rejected the same workload.
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<RejectionError>),
}

impl RejectionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RejectionError::ConcurrencyLimitExceeded(_) => "CONCURRENCY_LIMIT_EXCEEDED",
            RejectionError::KeypairResourceQuotaExceeded(_) => "KEYPAIR_RESOURCE_QUOTA_EXCEEDED",
            RejectionError::UserResourceQuotaExceeded(_) => "USER_RESOURCE_QUOTA_EXCEEDED",
            RejectionError::GroupResourceQuotaExceeded(_) => "GROUP_RESOURCE_QUOTA_EXCEEDED",
            RejectionError::DomainResourceQuotaExceeded(_) => "DOMAIN_RESOURCE_QUOTA_EXCEEDED",
            RejectionError::PendingSessionCountLimitExceeded(_) => {
                "PENDING_SESSION_COUNT_LIMIT_EXCEEDED"
            }
            RejectionError::PendingSessionResourceLimitExceeded(_) => {
                "PENDING_SESSION_RESOURCE_LIMIT_EXCEEDED"
            }
            RejectionError::DependenciesNotSatisfied(_) => "DEPENDENCIES_NOT_SATISFIED",
            RejectionError::Multiple(errors) => errors
                .first()
                .map(RejectionError::error_code)
                .unwrap_or("MULTIPLE_VALIDATION_ERRORS"),
        }
    }
}

/// Errors that can occur while running a scheduling cycle.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("rejected: {0}")]
    Rejected(#[from] RejectionError),

    #[error("agent selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    InvalidRegistryType(#[from] CoreError),

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// The blocking history write could not be joined.
    #[error("history write failed: {0}")]
    HistoryWrite(String),
}

impl SchedulerError {
    /// True when the workload stays pending and is retried on a later cycle.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SchedulerError::Rejected(_) => true,
            SchedulerError::Selection(e) => e.is_exhausted(),
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            SchedulerError::Rejected(e) => e.error_code(),
            SchedulerError::Selection(e) => e.error_code(),
            SchedulerError::InvalidRegistryType(_) => "INVALID_REGISTRY_TYPE",
            SchedulerError::MalformedSnapshot(_) => "MALFORMED_SNAPSHOT",
            SchedulerError::State(_) => "STATE_ERROR",
            SchedulerError::HistoryWrite(_) => "HISTORY_WRITE_FAILED",
        }
    }

    /// The message stored in history: the bare reason for rejections.
    pub fn reason(&self) -> String {
        match self {
            SchedulerError::Rejected(e) => e.to_string(),
            SchedulerError::Selection(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
