//! Per-workload execution record.
//!
//! Collects the named steps a workload went through in one cycle so they
//! can be stored as the `sub_steps` of its history entry.

use std::fmt;

use chrono::Utc;

use slotgrid_core::SchedulingResult;
use slotgrid_placement::SelectionError;
use slotgrid_state::SubStepResult;

use crate::error::{RejectionError, SchedulerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validation,
    AgentSelection,
    Allocation,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validation => "validation",
            Phase::AgentSelection => "agent_selection",
            Phase::Allocation => "allocation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that carry a stable code for history rows.
pub trait ErrorCode: fmt::Display {
    fn code(&self) -> &'static str;
}

impl ErrorCode for RejectionError {
    fn code(&self) -> &'static str {
        self.error_code()
    }
}

impl ErrorCode for SelectionError {
    fn code(&self) -> &'static str {
        self.error_code()
    }
}

impl ErrorCode for SchedulerError {
    fn code(&self) -> &'static str {
        self.error_code()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionRecord {
    steps: Vec<SubStepResult>,
}

impl ExecutionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as step `{phase}.{step}` and record its outcome.
    pub fn measure<T, E: ErrorCode>(
        &mut self,
        phase: Phase,
        step: &str,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let started_at = Utc::now();
        let outcome = f();
        let ended_at = Utc::now();
        let (result, error_code, message) = match &outcome {
            Ok(_) => (SchedulingResult::Success, None, None),
            Err(e) => (
                SchedulingResult::Failure,
                Some(e.code().to_string()),
                Some(e.to_string()),
            ),
        };
        self.steps.push(SubStepResult {
            step: format!("{phase}.{step}"),
            result,
            error_code,
            message,
            started_at,
            ended_at,
        });
        outcome
    }

    pub fn steps(&self) -> &[SubStepResult] {
        &self.steps
    }

    pub fn into_sub_steps(self) -> Vec<SubStepResult> {
        self.steps
    }
}
