//! Caps on how much a keypair may keep waiting in the queue.
//!
//! The candidate itself is pending too, so it is excluded from the count
//! and added back explicitly where its request matters.

use slotgrid_core::ResourceSlot;

use crate::error::RejectionError;
use crate::snapshot::SystemSnapshot;
use crate::validators::ValidatorRule;
use crate::workload::SessionWorkload;

pub struct PendingSessionCountLimitValidator;

impl ValidatorRule for PendingSessionCountLimitValidator {
    fn name(&self) -> &'static str {
        "pending_session_count_limit"
    }

    fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError> {
        let Some(policy) = snapshot
            .resource_policy
            .keypair_policies
            .get(&workload.access_key)
        else {
            return Ok(());
        };
        let limit = policy.max_pending_session_count;
        let others = snapshot
            .other_pending_sessions(&workload.access_key, workload.session_id)
            .count() as u64;
        match limit.value() {
            Some(max) if limit.is_reached_by(others) => {
                Err(RejectionError::PendingSessionCountLimitExceeded(format!(
                    "You cannot have more than {max} pending sessions"
                )))
            }
            _ => Ok(()),
        }
    }
}

pub struct PendingSessionResourceLimitValidator;

impl ValidatorRule for PendingSessionResourceLimitValidator {
    fn name(&self) -> &'static str {
        "pending_session_resource_limit"
    }

    fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError> {
        let Some(limit) = snapshot
            .resource_policy
            .keypair_policies
            .get(&workload.access_key)
            .and_then(|p| p.max_pending_session_resource_slots.as_ref())
        else {
            return Ok(());
        };
        let mut total: ResourceSlot = snapshot
            .other_pending_sessions(&workload.access_key, workload.session_id)
            .map(|p| &p.requested_slots)
            .sum();
        total += &workload.requested_slots;
        if total.fits_within_limit(limit) {
            return Ok(());
        }
        Err(RejectionError::PendingSessionResourceLimitExceeded(format!(
            "Your pending session quota is exceeded. ({})",
            limit.humanize(&snapshot.known_slot_types)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{KeyPairResourcePolicy, PendingSessionInfo};
    use crate::validators::testing::make_workload;
    use rust_decimal_macros::dec;
    use slotgrid_core::Limit;
    use uuid::Uuid;

    fn make_snapshot(policy: KeyPairResourcePolicy, pending: Vec<PendingSessionInfo>) -> SystemSnapshot {
        let mut snapshot = SystemSnapshot::default();
        snapshot
            .resource_policy
            .keypair_policies
            .insert("AKIA".into(), policy);
        snapshot
            .pending_sessions
            .by_keypair
            .insert("AKIA".into(), pending);
        snapshot
    }

    fn pending(id: Uuid, cpu: rust_decimal::Decimal) -> PendingSessionInfo {
        PendingSessionInfo {
            session_id: id,
            requested_slots: ResourceSlot::from([("cpu", cpu)]),
        }
    }

    #[test]
    fn candidate_does_not_count_against_itself() {
        let workload = make_workload("AKIA", dec!(1));
        let policy = KeyPairResourcePolicy {
            max_pending_session_count: Limit::limited(2),
            ..Default::default()
        };
        let snapshot = make_snapshot(
            policy.clone(),
            vec![pending(workload.session_id, dec!(1)), pending(Uuid::new_v4(), dec!(1))],
        );
        assert!(PendingSessionCountLimitValidator.validate(&snapshot, &workload).is_ok());

        let snapshot = make_snapshot(
            policy,
            vec![
                pending(workload.session_id, dec!(1)),
                pending(Uuid::new_v4(), dec!(1)),
                pending(Uuid::new_v4(), dec!(1)),
            ],
        );
        let err = PendingSessionCountLimitValidator
            .validate(&snapshot, &workload)
            .unwrap_err();
        assert_eq!(err.to_string(), "You cannot have more than 2 pending sessions");
    }

    #[test]
    fn zero_pending_count_is_unlimited() {
        let workload = make_workload("AKIA", dec!(1));
        let policy = KeyPairResourcePolicy {
            max_pending_session_count: Limit::from(Some(0)),
            ..Default::default()
        };
        let others = (0..50).map(|_| pending(Uuid::new_v4(), dec!(1))).collect();
        let snapshot = make_snapshot(policy, others);
        assert!(PendingSessionCountLimitValidator.validate(&snapshot, &workload).is_ok());
    }

    #[test]
    fn pending_resources_include_the_candidate() {
        let workload = make_workload("AKIA", dec!(2));
        let policy = KeyPairResourcePolicy {
            max_pending_session_resource_slots: Some(ResourceSlot::from([("cpu", dec!(4))])),
            ..Default::default()
        };
        let snapshot = make_snapshot(
            policy.clone(),
            vec![pending(workload.session_id, dec!(2)), pending(Uuid::new_v4(), dec!(2))],
        );
        assert!(PendingSessionResourceLimitValidator.validate(&snapshot, &workload).is_ok());

        let snapshot = make_snapshot(policy, vec![pending(Uuid::new_v4(), dec!(2.5))]);
        let err = PendingSessionResourceLimitValidator
            .validate(&snapshot, &workload)
            .unwrap_err();
        assert_eq!(err.error_code(), "PENDING_SESSION_RESOURCE_LIMIT_EXCEEDED");
    }
}
