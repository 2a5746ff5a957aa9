//! Resource quotas at the keypair, user, project and domain level.
//!
//! A quota is a [`ResourceSlot`] whose missing keys are unlimited. The
//! workload passes when what the owner already occupies plus the new
//! request still fits.

use slotgrid_core::ResourceSlot;

use crate::error::RejectionError;
use crate::snapshot::SystemSnapshot;
use crate::validators::ValidatorRule;
use crate::workload::SessionWorkload;

fn check_quota(
    snapshot: &SystemSnapshot,
    occupied: Option<&ResourceSlot>,
    requested: &ResourceSlot,
    limit: &ResourceSlot,
    reject: impl FnOnce(String) -> RejectionError,
    owner: &str,
) -> Result<(), RejectionError> {
    let total = match occupied {
        Some(occupied) => occupied + requested,
        None => requested.clone(),
    };
    if total.fits_within_limit(limit) {
        return Ok(());
    }
    Err(reject(format!(
        "Your {owner} resource quota is exceeded. ({})",
        limit.humanize(&snapshot.known_slot_types)
    )))
}

pub struct KeypairResourceLimitValidator;

impl ValidatorRule for KeypairResourceLimitValidator {
    fn name(&self) -> &'static str {
        "keypair_resource_limit"
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
        let occupied = snapshot
            .resource_occupancy
            .by_keypair
            .get(&workload.access_key)
            .map(|o| &o.occupied_slots);
        check_quota(
            snapshot,
            occupied,
            &workload.requested_slots,
            &policy.total_resource_slots,
            RejectionError::KeypairResourceQuotaExceeded,
            "keypair",
        )
    }
}

pub struct UserResourceLimitValidator;

impl ValidatorRule for UserResourceLimitValidator {
    fn name(&self) -> &'static str {
        "user_resource_limit"
    }

    fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError> {
        let Some(policy) = snapshot
            .resource_policy
            .user_policies
            .get(&workload.user_uuid)
        else {
            return Ok(());
        };
        check_quota(
            snapshot,
            snapshot.resource_occupancy.by_user.get(&workload.user_uuid),
            &workload.requested_slots,
            &policy.total_resource_slots,
            RejectionError::UserResourceQuotaExceeded,
            "user",
        )
    }
}

pub struct GroupResourceLimitValidator;

impl ValidatorRule for GroupResourceLimitValidator {
    fn name(&self) -> &'static str {
        "group_resource_limit"
    }

    fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError> {
        let Some(limit) = snapshot.resource_policy.group_limits.get(&workload.group_id) else {
            return Ok(());
        };
        check_quota(
            snapshot,
            snapshot.resource_occupancy.by_group.get(&workload.group_id),
            &workload.requested_slots,
            limit,
            RejectionError::GroupResourceQuotaExceeded,
            "project",
        )
    }
}

pub struct DomainResourceLimitValidator;

impl ValidatorRule for DomainResourceLimitValidator {
    fn name(&self) -> &'static str {
        "domain_resource_limit"
    }

    fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError> {
        let Some(limit) = snapshot
            .resource_policy
            .domain_limits
            .get(&workload.domain_name)
        else {
            return Ok(());
        };
        check_quota(
            snapshot,
            snapshot.resource_occupancy.by_domain.get(&workload.domain_name),
            &workload.requested_slots,
            limit,
            RejectionError::DomainResourceQuotaExceeded,
            "domain",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{KeyPairResourcePolicy, KeypairOccupancy, UserResourcePolicy};
    use crate::validators::testing::make_workload;
    use rust_decimal_macros::dec;

    #[test]
    fn keypair_quota_counts_existing_occupancy() {
        let mut snapshot = SystemSnapshot::default();
        snapshot.known_slot_types = ["cpu", "mem"].iter().map(|s| s.to_string()).collect();
        snapshot.resource_policy.keypair_policies.insert(
            "AKIA".into(),
            KeyPairResourcePolicy {
                total_resource_slots: ResourceSlot::from([
                    ("cpu", dec!(4)),
                    ("mem", dec!(4294967296)),
                ]),
                ..Default::default()
            },
        );
        snapshot.resource_occupancy.by_keypair.insert(
            "AKIA".into(),
            KeypairOccupancy {
                occupied_slots: ResourceSlot::from([("cpu", dec!(3))]),
                ..Default::default()
            },
        );

        let fits = make_workload("AKIA", dec!(1));
        assert!(KeypairResourceLimitValidator.validate(&snapshot, &fits).is_ok());

        let too_big = make_workload("AKIA", dec!(1.5));
        let err = KeypairResourceLimitValidator
            .validate(&snapshot, &too_big)
            .unwrap_err();
        assert_eq!(err.error_code(), "KEYPAIR_RESOURCE_QUOTA_EXCEEDED");
        assert_eq!(
            err.to_string(),
            "Your keypair resource quota is exceeded. (cpu=4 mem=4 GiB)"
        );
    }

    #[test]
    fn missing_quota_key_is_unlimited() {
        let mut snapshot = SystemSnapshot::default();
        snapshot.resource_policy.user_policies.insert(
            uuid::Uuid::from_u128(100),
            UserResourcePolicy {
                name: "default".into(),
                total_resource_slots: ResourceSlot::from([("cuda.device", dec!(1))]),
            },
        );
        let workload = make_workload("AKIA", dec!(512));
        assert!(UserResourceLimitValidator.validate(&snapshot, &workload).is_ok());
    }

    #[test]
    fn group_and_domain_limits() {
        let mut snapshot = SystemSnapshot::default();
        snapshot
            .resource_policy
            .group_limits
            .insert(uuid::Uuid::from_u128(200), ResourceSlot::from([("cpu", dec!(2))]));
        snapshot
            .resource_policy
            .domain_limits
            .insert("default".into(), ResourceSlot::from([("cpu", dec!(10))]));
        snapshot
            .resource_occupancy
            .by_domain
            .insert("default".into(), ResourceSlot::from([("cpu", dec!(9))]));

        let workload = make_workload("AKIA", dec!(2));
        assert!(GroupResourceLimitValidator.validate(&snapshot, &workload).is_ok());
        let err = DomainResourceLimitValidator
            .validate(&snapshot, &workload)
            .unwrap_err();
        assert_eq!(err.error_code(), "DOMAIN_RESOURCE_QUOTA_EXCEEDED");

        let bigger = make_workload("AKIA", dec!(3));
        let err = GroupResourceLimitValidator
            .validate(&snapshot, &bigger)
            .unwrap_err();
        assert!(err.to_string().starts_with("Your project resource quota"));
    }
}
