use crate::error::RejectionError;
use crate::snapshot::SystemSnapshot;
use crate::validators::ValidatorRule;
use crate::workload::SessionWorkload;

/// Holds a session back until every session it depends on finished
/// successfully.
pub struct DependenciesValidator;

impl ValidatorRule for DependenciesValidator {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError> {
        let Some(dependencies) = snapshot
            .session_dependencies
            .by_session
            .get(&workload.session_id)
        else {
            return Ok(());
        };
        let waiting: Vec<&str> = dependencies
            .iter()
            .filter(|d| !d.is_satisfied())
            .map(|d| d.dependency_name.as_str())
            .collect();
        if waiting.is_empty() {
            return Ok(());
        }
        Err(RejectionError::DependenciesNotSatisfied(format!(
            "Waiting dependency sessions to finish as success. ({})",
            waiting.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SessionDependencyInfo;
    use crate::validators::testing::make_workload;
    use rust_decimal_macros::dec;
    use slotgrid_core::{SessionResult, SessionStatus};
    use uuid::Uuid;

    fn dep(name: &str, status: SessionStatus, result: SessionResult) -> SessionDependencyInfo {
        SessionDependencyInfo {
            depends_on: Uuid::new_v4(),
            dependency_name: name.to_string(),
            dependency_status: status,
            dependency_result: result,
        }
    }

    #[test]
    fn lists_unsatisfied_dependencies() {
        let workload = make_workload("AKIA", dec!(1));
        let mut snapshot = SystemSnapshot::default();
        snapshot.session_dependencies.by_session.insert(
            workload.session_id,
            vec![
                dep("prep", SessionStatus::Terminated, SessionResult::Success),
                dep("train", SessionStatus::Running, SessionResult::Undefined),
                dep("eval", SessionStatus::Terminated, SessionResult::Failure),
            ],
        );
        let err = DependenciesValidator.validate(&snapshot, &workload).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Waiting dependency sessions to finish as success. (train, eval)"
        );
    }

    #[test]
    fn all_successful_dependencies_pass() {
        let workload = make_workload("AKIA", dec!(1));
        let mut snapshot = SystemSnapshot::default();
        snapshot.session_dependencies.by_session.insert(
            workload.session_id,
            vec![dep("prep", SessionStatus::Terminated, SessionResult::Success)],
        );
        assert!(DependenciesValidator.validate(&snapshot, &workload).is_ok());
        assert!(DependenciesValidator
            .validate(&SystemSnapshot::default(), &workload)
            .is_ok());
    }
}
