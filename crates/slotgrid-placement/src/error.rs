//! Agent selection errors.

use thiserror::Error;

use slotgrid_core::AgentId;

pub type SelectionResult<T> = Result<T, SelectionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// Agents with the right architecture exist, but none has room.
    #[error("no available agents. Details: {0}")]
    NoAvailableAgent(String),

    #[error("no agents with required architecture {required:?}. Available architectures: {}", .available.join(", "))]
    NoCompatibleAgent {
        required: String,
        available: Vec<String>,
    },

    #[error("designated agents {designated:?} are not available. Details: {details}")]
    DesignatedAgentUnavailable {
        designated: Vec<AgentId>,
        details: String,
    },

    /// A single-node session mixes kernel architectures. Malformed input.
    #[error("single-node session has kernels with different architectures: {}", .0.join(", "))]
    ArchitectureMismatch(Vec<String>),
}

impl SelectionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SelectionError::NoAvailableAgent(_) => "NO_AVAILABLE_AGENT",
            SelectionError::NoCompatibleAgent { .. } => "NO_COMPATIBLE_AGENT",
            SelectionError::DesignatedAgentUnavailable { .. } => "DESIGNATED_AGENT_UNAVAILABLE",
            SelectionError::ArchitectureMismatch(_) => "ARCHITECTURE_MISMATCH",
        }
    }

    /// True when the workload may succeed on a later cycle.
    pub fn is_exhausted(&self) -> bool {
        !matches!(self, SelectionError::ArchitectureMismatch(_))
    }
}
