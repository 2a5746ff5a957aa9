//! Point-in-time view of a resource group, as handed over by the
//! repository layer at the start of a scheduling cycle.
//!
//! Validators and sequencers only read a [`SystemSnapshot`]. The cycle
//! driver folds each allocation it makes into its own working copy with
//! [`SystemSnapshot::with_allocation`], which consumes the old value.

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use slotgrid_core::{
    AccessKey, AgentId, DomainName, Limit, ProjectId, ResourceSlot, SessionId, SessionResult,
    SessionStatus, UserId,
};

use crate::allocation::SessionAllocation;
use crate::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub total_capacity: ResourceSlot,
    #[serde(default)]
    pub resource_occupancy: ResourceOccupancySnapshot,
    #[serde(default)]
    pub resource_policy: ResourcePolicySnapshot,
    #[serde(default)]
    pub concurrency: ConcurrencySnapshot,
    #[serde(default)]
    pub pending_sessions: PendingSessionSnapshot,
    #[serde(default)]
    pub session_dependencies: SessionDependencySnapshot,
    /// Slot types shown in quota messages.
    #[serde(default)]
    pub known_slot_types: BTreeSet<String>,
}

// ── Occupancy ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeypairOccupancy {
    pub occupied_slots: ResourceSlot,
    #[serde(default)]
    pub session_count: u64,
    #[serde(default)]
    pub sftp_session_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOccupancy {
    pub occupied_slots: ResourceSlot,
    #[serde(default)]
    pub container_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOccupancySnapshot {
    #[serde(default)]
    pub by_keypair: HashMap<AccessKey, KeypairOccupancy>,
    #[serde(default)]
    pub by_user: HashMap<UserId, ResourceSlot>,
    #[serde(default)]
    pub by_group: HashMap<ProjectId, ResourceSlot>,
    #[serde(default)]
    pub by_domain: HashMap<DomainName, ResourceSlot>,
    #[serde(default)]
    pub by_agent: HashMap<AgentId, AgentOccupancy>,
}

// ── Policies ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairResourcePolicy {
    #[serde(default)]
    pub name: String,
    /// Missing keys are unlimited.
    #[serde(default)]
    pub total_resource_slots: ResourceSlot,
    #[serde(default)]
    pub max_concurrent_sessions: Limit,
    #[serde(default)]
    pub max_concurrent_sftp_sessions: Limit,
    #[serde(default)]
    pub max_pending_session_count: Limit,
    #[serde(default)]
    pub max_pending_session_resource_slots: Option<ResourceSlot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResourcePolicy {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub total_resource_slots: ResourceSlot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePolicySnapshot {
    #[serde(default)]
    pub keypair_policies: HashMap<AccessKey, KeyPairResourcePolicy>,
    #[serde(default)]
    pub user_policies: HashMap<UserId, UserResourcePolicy>,
    #[serde(default)]
    pub group_limits: HashMap<ProjectId, ResourceSlot>,
    #[serde(default)]
    pub domain_limits: HashMap<DomainName, ResourceSlot>,
}

// ── Counters, pending sessions, dependencies ──────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySnapshot {
    #[serde(default)]
    pub sessions_by_keypair: HashMap<AccessKey, u64>,
    #[serde(default)]
    pub sftp_sessions_by_keypair: HashMap<AccessKey, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSessionInfo {
    pub session_id: SessionId,
    pub requested_slots: ResourceSlot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSessionSnapshot {
    #[serde(default)]
    pub by_keypair: HashMap<AccessKey, Vec<PendingSessionInfo>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDependencyInfo {
    pub depends_on: SessionId,
    pub dependency_name: String,
    pub dependency_status: SessionStatus,
    #[serde(default)]
    pub dependency_result: SessionResult,
}

impl SessionDependencyInfo {
    pub fn is_satisfied(&self) -> bool {
        self.dependency_status == SessionStatus::Terminated
            && self.dependency_result == SessionResult::Success
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDependencySnapshot {
    #[serde(default)]
    pub by_session: HashMap<SessionId, Vec<SessionDependencyInfo>>,
}

impl SystemSnapshot {
    /// Reject structurally invalid input before any rule reads it.
    pub fn check(&self) -> SchedulerResult<()> {
        if let Some((key, _)) = self
            .total_capacity
            .iter()
            .find(|(_, v)| v.is_sign_negative() && !v.is_zero())
        {
            return Err(SchedulerError::MalformedSnapshot(format!(
                "negative total capacity for {key:?}"
            )));
        }
        for (access_key, occupancy) in &self.resource_occupancy.by_keypair {
            if occupancy
                .occupied_slots
                .iter()
                .any(|(_, v)| v.is_sign_negative() && !v.is_zero())
            {
                return Err(SchedulerError::MalformedSnapshot(format!(
                    "negative occupancy for keypair {access_key:?}"
                )));
            }
        }
        Ok(())
    }

    /// Largest share of any capacity type the keypair already holds.
    ///
    /// Keypairs without occupancy have share zero. A capacity type with a
    /// zero total contributes zero. A ratio beyond the decimal range counts
    /// as `Decimal::MAX`.
    pub fn dominant_share(&self, access_key: &str) -> Decimal {
        let Some(occupancy) = self.resource_occupancy.by_keypair.get(access_key) else {
            return Decimal::ZERO;
        };
        self.total_capacity
            .iter()
            .filter(|(_, total)| *total > Decimal::ZERO)
            .map(|(slot_type, total)| {
                occupancy
                    .occupied_slots
                    .get(slot_type)
                    .checked_div(total)
                    .unwrap_or(Decimal::MAX)
            })
            .fold(Decimal::ZERO, Decimal::max)
    }

    pub fn keypair_occupied(&self, access_key: &str) -> ResourceSlot {
        self.resource_occupancy
            .by_keypair
            .get(access_key)
            .map(|o| o.occupied_slots.clone())
            .unwrap_or_default()
    }

    /// Pending sessions of `access_key` other than `session_id`.
    pub fn other_pending_sessions<'a>(
        &'a self,
        access_key: &str,
        session_id: SessionId,
    ) -> impl Iterator<Item = &'a PendingSessionInfo> + 'a {
        self.pending_sessions
            .by_keypair
            .get(access_key)
            .into_iter()
            .flatten()
            .filter(move |p| p.session_id != session_id)
    }

    /// The snapshot as it looks once `allocation` is in place.
    pub fn with_allocation(mut self, allocation: &SessionAllocation) -> Self {
        let requested = &allocation.requested_slots;

        let keypair = self
            .resource_occupancy
            .by_keypair
            .entry(allocation.access_key.clone())
            .or_default();
        keypair.occupied_slots.saturating_add_assign(requested);
        let counters = if allocation.is_private {
            keypair.sftp_session_count += 1;
            &mut self.concurrency.sftp_sessions_by_keypair
        } else {
            keypair.session_count += 1;
            &mut self.concurrency.sessions_by_keypair
        };
        *counters.entry(allocation.access_key.clone()).or_default() += 1;

        self.resource_occupancy
            .by_user
            .entry(allocation.user_uuid)
            .or_default()
            .saturating_add_assign(requested);
        self.resource_occupancy
            .by_group
            .entry(allocation.group_id)
            .or_default()
            .saturating_add_assign(requested);
        self.resource_occupancy
            .by_domain
            .entry(allocation.domain_name.clone())
            .or_default()
            .saturating_add_assign(requested);

        for kernel in &allocation.kernel_allocations {
            let agent = self
                .resource_occupancy
                .by_agent
                .entry(kernel.agent_id.clone())
                .or_default();
            agent.occupied_slots.saturating_add_assign(&kernel.requested_slots);
            agent.container_count += 1;
        }

        if let Some(pending) = self.pending_sessions.by_keypair.get_mut(&allocation.access_key) {
            pending.retain(|p| p.session_id != allocation.session_id);
        }
        self
    }
}
