//! Pending session requests as the scheduler sees them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use slotgrid_core::{
    AccessKey, AgentId, ClusterMode, DomainName, KernelId, ProjectId, ResourceGroupName,
    ResourceSlot, SessionId, UserId,
};
use slotgrid_placement::{
    AgentSelectionCriteria, ClusterConfigurationRule, KernelClusterConfig, KernelClusterSpec,
    KernelResourceSpec, SessionMetadata,
};

use crate::error::{SchedulerError, SchedulerResult};

fn default_cluster_size() -> u32 {
    1
}

/// One kernel as declared on the pending session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelWorkload {
    pub kernel_id: KernelId,
    pub requested_slots: ResourceSlot,
    pub architecture: String,
    #[serde(flatten)]
    pub cluster: KernelClusterSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWorkload {
    pub session_id: SessionId,
    pub access_key: AccessKey,
    /// Total request of the whole session.
    pub requested_slots: ResourceSlot,
    pub user_uuid: UserId,
    pub group_id: ProjectId,
    pub domain_name: DomainName,
    pub resource_group: ResourceGroupName,
    #[serde(default)]
    pub priority: i32,
    /// SFTP sessions count against their own concurrency quota.
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub cluster_mode: ClusterMode,
    #[serde(default = "default_cluster_size")]
    pub cluster_size: u32,
    pub kernels: Vec<KernelWorkload>,
    #[serde(default)]
    pub designated_agent_ids: Vec<AgentId>,
    #[serde(default)]
    pub kernel_counts_at_endpoint: Option<BTreeMap<AgentId, u32>>,
}

/// A kernel with its final identity and cluster layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKernel {
    pub kernel_id: KernelId,
    pub requested_slots: ResourceSlot,
    pub architecture: String,
    pub cluster: KernelClusterConfig,
}

impl SessionWorkload {
    /// Expand the declared kernels into the session's full kernel list.
    ///
    /// A single kernel with `cluster_size > 1` is replicated; the first
    /// replica keeps the declared kernel id, the others get fresh ids.
    pub fn resolve_kernels(&self) -> SchedulerResult<Vec<ResolvedKernel>> {
        if self.kernels.is_empty() {
            return Err(SchedulerError::MalformedSnapshot(format!(
                "session {} has no kernels",
                self.session_id
            )));
        }
        let specs: Vec<KernelClusterSpec> = self.kernels.iter().map(|k| k.cluster.clone()).collect();
        let rule = ClusterConfigurationRule::new(self.cluster_mode, self.cluster_size);
        rule.apply(&specs)
            .into_iter()
            .enumerate()
            .map(|(position, cluster)| {
                let source = self.kernels.get(cluster.spec_index).ok_or_else(|| {
                    SchedulerError::MalformedSnapshot(format!(
                        "cluster layout of session {} refers to missing kernel {}",
                        self.session_id, cluster.spec_index
                    ))
                })?;
                let kernel_id = if cluster.spec_index == position {
                    source.kernel_id
                } else {
                    Uuid::new_v4()
                };
                Ok(ResolvedKernel {
                    kernel_id,
                    requested_slots: source.requested_slots.clone(),
                    architecture: source.architecture.clone(),
                    cluster,
                })
            })
            .collect()
    }

    pub fn selection_criteria(&self, kernels: &[ResolvedKernel]) -> AgentSelectionCriteria {
        AgentSelectionCriteria {
            session_metadata: SessionMetadata {
                session_id: self.session_id,
                scaling_group: self.resource_group.clone(),
                cluster_mode: self.cluster_mode,
            },
            kernel_requirements: kernels
                .iter()
                .map(|k| {
                    (
                        k.kernel_id,
                        KernelResourceSpec {
                            requested_slots: k.requested_slots.clone(),
                            required_architecture: k.architecture.clone(),
                        },
                    )
                })
                .collect(),
            kernel_counts_at_endpoint: self.kernel_counts_at_endpoint.clone(),
        }
    }
}
