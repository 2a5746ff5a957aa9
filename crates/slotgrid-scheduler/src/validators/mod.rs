//! Admission rules run against every workload before it may be placed.
//!
//! Each rule is a pure check over a [`SystemSnapshot`] and one
//! [`SessionWorkload`]; none of them mutate the snapshot. The composite
//! [`SchedulingValidator`] runs every rule and reports all rejections at
//! once.

mod concurrency;
mod dependencies;
mod limits;
mod pending;

pub use concurrency::ConcurrencyValidator;
pub use dependencies::DependenciesValidator;
pub use limits::{
    DomainResourceLimitValidator, GroupResourceLimitValidator, KeypairResourceLimitValidator,
    UserResourceLimitValidator,
};
pub use pending::{PendingSessionCountLimitValidator, PendingSessionResourceLimitValidator};

use tracing::debug;

use crate::error::RejectionError;
use crate::recorder::{ExecutionRecord, Phase};
use crate::snapshot::SystemSnapshot;
use crate::workload::SessionWorkload;

pub trait ValidatorRule: Send + Sync {
    /// Step name used in execution records.
    fn name(&self) -> &'static str;

    fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError>;
}

/// Runs a set of rules and merges their rejections.
pub struct SchedulingValidator {
    rules: Vec<Box<dyn ValidatorRule>>,
}

impl SchedulingValidator {
    pub fn new(rules: Vec<Box<dyn ValidatorRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError> {
        let errors = self
            .rules
            .iter()
            .filter_map(|rule| rule.validate(snapshot, workload).err())
            .collect();
        combine(workload, errors)
    }

    /// Like [`validate`](Self::validate), recording one step per rule.
    pub fn validate_recorded(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
        record: &mut ExecutionRecord,
    ) -> Result<(), RejectionError> {
        let mut errors = Vec::new();
        for rule in &self.rules {
            if let Err(e) = record.measure(Phase::Validation, rule.name(), || {
                rule.validate(snapshot, workload)
            }) {
                errors.push(e);
            }
        }
        combine(workload, errors)
    }
}

impl Default for SchedulingValidator {
    fn default() -> Self {
        Self::new(vec![
            Box::new(ConcurrencyValidator),
            Box::new(DependenciesValidator),
            Box::new(KeypairResourceLimitValidator),
            Box::new(UserResourceLimitValidator),
            Box::new(GroupResourceLimitValidator),
            Box::new(DomainResourceLimitValidator),
            Box::new(PendingSessionCountLimitValidator),
            Box::new(PendingSessionResourceLimitValidator),
        ])
    }
}

fn combine(
    workload: &SessionWorkload,
    mut errors: Vec<RejectionError>,
) -> Result<(), RejectionError> {
    let result = match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(RejectionError::Multiple(errors)),
    };
    if let Err(e) = &result {
        debug!(
            session_id = %workload.session_id,
            access_key = %workload.access_key,
            code = e.error_code(),
            reason = %e,
            "workload rejected"
        );
    }
    result
}

#[cfg(test)]
pub(crate) mod testing {
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use slotgrid_core::{ClusterMode, ResourceSlot};

    use crate::workload::{KernelWorkload, SessionWorkload};

    pub fn make_workload(access_key: &str, cpu: rust_decimal::Decimal) -> SessionWorkload {
        SessionWorkload {
            session_id: Uuid::new_v4(),
            access_key: access_key.to_string(),
            requested_slots: ResourceSlot::from([("cpu", cpu), ("mem", dec!(1024))]),
            user_uuid: Uuid::from_u128(100),
            group_id: Uuid::from_u128(200),
            domain_name: "default".to_string(),
            resource_group: "default".to_string(),
            priority: 0,
            is_private: false,
            cluster_mode: ClusterMode::SingleNode,
            cluster_size: 1,
            kernels: vec![KernelWorkload {
                kernel_id: Uuid::new_v4(),
                requested_slots: ResourceSlot::from([("cpu", cpu), ("mem", dec!(1024))]),
                architecture: "x86_64".to_string(),
                cluster: Default::default(),
            }],
            designated_agent_ids: Vec::new(),
            kernel_counts_at_endpoint: None,
        }
    }
}
