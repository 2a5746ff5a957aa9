//! Outcomes of a scheduling cycle.

use serde::{Deserialize, Serialize};

use slotgrid_core::{
    AccessKey, AgentId, DomainName, KernelId, ProjectId, ResourceGroupName, ResourceSlot,
    SessionId, UserId,
};
use slotgrid_placement::{AgentSelection, KernelClusterConfig};

use crate::error::{SchedulerError, SchedulerResult};
use crate::workload::{ResolvedKernel, SessionWorkload};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelAllocation {
    pub kernel_id: KernelId,
    pub agent_id: AgentId,
    pub agent_addr: String,
    pub requested_slots: ResourceSlot,
    pub cluster: KernelClusterConfig,
}

/// Where every kernel of a scheduled session goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAllocation {
    pub session_id: SessionId,
    pub access_key: AccessKey,
    pub user_uuid: UserId,
    pub group_id: ProjectId,
    pub domain_name: DomainName,
    pub resource_group: ResourceGroupName,
    pub is_private: bool,
    pub requested_slots: ResourceSlot,
    pub kernel_allocations: Vec<KernelAllocation>,
}

impl SessionAllocation {
    /// Pair each resolved kernel with the agent its requirement landed on.
    pub fn build(
        workload: &SessionWorkload,
        kernels: &[ResolvedKernel],
        selections: &[AgentSelection],
    ) -> SchedulerResult<Self> {
        let kernel_allocations = kernels
            .iter()
            .map(|kernel| {
                let selection = selections
                    .iter()
                    .find(|s| s.resource_requirements.kernel_ids.contains(&kernel.kernel_id))
                    .ok_or_else(|| {
                        SchedulerError::MalformedSnapshot(format!(
                            "no agent selected for kernel {}",
                            kernel.kernel_id
                        ))
                    })?;
                Ok(KernelAllocation {
                    kernel_id: kernel.kernel_id,
                    agent_id: selection.agent_id.clone(),
                    agent_addr: selection.agent_addr.clone(),
                    requested_slots: kernel.requested_slots.clone(),
                    cluster: kernel.cluster.clone(),
                })
            })
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok(Self {
            session_id: workload.session_id,
            access_key: workload.access_key.clone(),
            user_uuid: workload.user_uuid,
            group_id: workload.group_id,
            domain_name: workload.domain_name.clone(),
            resource_group: workload.resource_group.clone(),
            is_private: workload.is_private,
            requested_slots: workload.requested_slots.clone(),
            kernel_allocations,
        })
    }

    /// Distinct agents in kernel order.
    pub fn agent_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for kernel in &self.kernel_allocations {
            if !ids.contains(&kernel.agent_id.as_str()) {
                ids.push(&kernel.agent_id);
            }
        }
        ids
    }
}

/// A workload left pending by this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingFailure {
    pub session_id: SessionId,
    pub error_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub resource_group: ResourceGroupName,
    pub allocations: Vec<SessionAllocation>,
    pub failures: Vec<SchedulingFailure>,
}

impl ScheduleResult {
    pub fn scheduled_count(&self) -> usize {
        self.allocations.len()
    }
}
