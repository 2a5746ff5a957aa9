//! Agent snapshots and the per-cycle view the selector works on.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use slotgrid_core::{AgentId, ClusterMode, KernelId, ResourceSlot, SessionId};

use crate::error::{SelectionError, SelectionResult};

/// What the agent registry reports about one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: AgentId,
    #[serde(default)]
    pub agent_addr: String,
    pub architecture: String,
    /// Total slots the agent offers.
    pub available_slots: ResourceSlot,
    #[serde(default)]
    pub occupied_slots: ResourceSlot,
    #[serde(default)]
    pub scaling_group: String,
    #[serde(default)]
    pub container_count: u32,
}

/// Cycle-local bookkeeping on top of an [`AgentInfo`].
///
/// Reservations made while scheduling a cycle accumulate here and are
/// dropped with the tracker at the end of the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStateTracker {
    pub original: AgentInfo,
    additional_slots: ResourceSlot,
    additional_containers: u32,
}

impl AgentStateTracker {
    pub fn new(original: AgentInfo) -> Self {
        Self {
            original,
            additional_slots: ResourceSlot::new(),
            additional_containers: 0,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.original.agent_id
    }

    pub fn current_occupied_slots(&self) -> ResourceSlot {
        &self.original.occupied_slots + &self.additional_slots
    }

    pub fn current_container_count(&self) -> u32 {
        self.original.container_count + self.additional_containers
    }

    /// Capacity left after the original load and this cycle's reservations.
    pub fn remaining_slots(&self) -> ResourceSlot {
        &self.original.available_slots - &self.current_occupied_slots()
    }

    pub fn apply_diff(&mut self, slots: &ResourceSlot, containers: u32) {
        self.additional_slots += slots;
        self.additional_containers += containers;
    }

    pub fn has_reservations(&self) -> bool {
        !self.additional_slots.is_zero() || self.additional_containers > 0
    }

    pub fn additional_slots(&self) -> &ResourceSlot {
        &self.additional_slots
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelResourceSpec {
    pub requested_slots: ResourceSlot,
    pub required_architecture: String,
}

/// One placement unit: a whole single-node session or one kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub requested_slots: ResourceSlot,
    pub required_architecture: String,
    pub kernel_ids: Vec<KernelId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: SessionId,
    pub scaling_group: String,
    pub cluster_mode: ClusterMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSelectionCriteria {
    pub session_metadata: SessionMetadata,
    /// Kernels in session order.
    pub kernel_requirements: Vec<(KernelId, KernelResourceSpec)>,
    /// Kernels of the same endpoint already running on each agent.
    pub kernel_counts_at_endpoint: Option<BTreeMap<AgentId, u32>>,
}

impl AgentSelectionCriteria {
    /// Split the session into placement units.
    ///
    /// Single-node sessions become one aggregated requirement carrying every
    /// kernel id; multi-node sessions yield one requirement per kernel.
    pub fn resource_requirements(&self) -> SelectionResult<Vec<ResourceRequirements>> {
        if self.kernel_requirements.is_empty() {
            return Ok(Vec::new());
        }

        match self.session_metadata.cluster_mode {
            ClusterMode::SingleNode => {
                let architectures: BTreeSet<&str> = self
                    .kernel_requirements
                    .iter()
                    .map(|(_, spec)| spec.required_architecture.as_str())
                    .collect();
                if architectures.len() > 1 {
                    return Err(SelectionError::ArchitectureMismatch(
                        architectures.into_iter().map(String::from).collect(),
                    ));
                }
                let required_architecture = architectures
                    .into_iter()
                    .next()
                    .map(String::from)
                    .unwrap_or_default();
                let requested_slots = self
                    .kernel_requirements
                    .iter()
                    .map(|(_, spec)| &spec.requested_slots)
                    .sum();
                Ok(vec![ResourceRequirements {
                    requested_slots,
                    required_architecture,
                    kernel_ids: self.kernel_requirements.iter().map(|(id, _)| *id).collect(),
                }])
            }
            ClusterMode::MultiNode => Ok(self
                .kernel_requirements
                .iter()
                .map(|(id, spec)| ResourceRequirements {
                    requested_slots: spec.requested_slots.clone(),
                    required_architecture: spec.required_architecture.clone(),
                    kernel_ids: vec![*id],
                })
                .collect()),
        }
    }

    pub fn endpoint_kernel_count(&self, agent_id: &str) -> u32 {
        self.kernel_counts_at_endpoint
            .as_ref()
            .and_then(|counts| counts.get(agent_id).copied())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSelectionConfig {
    pub max_container_count: Option<u32>,
    #[serde(default)]
    pub enforce_spreading_endpoint_replica: bool,
}

/// A requirement paired with the agent chosen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSelection {
    pub resource_requirements: ResourceRequirements,
    pub agent_id: AgentId,
    pub agent_addr: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn make_criteria(mode: ClusterMode, archs: &[&str]) -> AgentSelectionCriteria {
        AgentSelectionCriteria {
            session_metadata: SessionMetadata {
                session_id: Uuid::new_v4(),
                scaling_group: "default".to_string(),
                cluster_mode: mode,
            },
            kernel_requirements: archs
                .iter()
                .enumerate()
                .map(|(i, arch)| {
                    (
                        Uuid::from_u128(i as u128 + 1),
                        KernelResourceSpec {
                            requested_slots: ResourceSlot::from([("cpu", dec!(1)), ("mem", dec!(512))]),
                            required_architecture: arch.to_string(),
                        },
                    )
                })
                .collect(),
            kernel_counts_at_endpoint: None,
        }
    }

    #[test]
    fn single_node_aggregates_kernels() {
        let criteria = make_criteria(ClusterMode::SingleNode, &["x86_64", "x86_64", "x86_64"]);
        let reqs = criteria.resource_requirements().unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].kernel_ids.len(), 3);
        assert_eq!(reqs[0].requested_slots.get("cpu"), dec!(3));
        assert_eq!(reqs[0].requested_slots.get("mem"), dec!(1536));
        assert_eq!(reqs[0].required_architecture, "x86_64");
    }

    #[test]
    fn single_node_rejects_mixed_architectures() {
        let criteria = make_criteria(ClusterMode::SingleNode, &["x86_64", "aarch64"]);
        let err = criteria.resource_requirements().unwrap_err();
        assert_eq!(
            err,
            SelectionError::ArchitectureMismatch(vec!["aarch64".into(), "x86_64".into()])
        );
        assert!(!err.is_exhausted());
    }

    #[test]
    fn multi_node_keeps_kernels_separate() {
        let criteria = make_criteria(ClusterMode::MultiNode, &["x86_64", "aarch64"]);
        let reqs = criteria.resource_requirements().unwrap();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].kernel_ids, vec![Uuid::from_u128(1)]);
        assert_eq!(reqs[1].required_architecture, "aarch64");
    }

    #[test]
    fn no_kernels_no_requirements() {
        let criteria = make_criteria(ClusterMode::SingleNode, &[]);
        assert!(criteria.resource_requirements().unwrap().is_empty());
    }

    #[test]
    fn tracker_accumulates_reservations() {
        let agent = AgentInfo {
            agent_id: "a1".into(),
            agent_addr: "tcp://10.0.0.1:6001".into(),
            architecture: "x86_64".into(),
            available_slots: ResourceSlot::from([("cpu", dec!(8)), ("mem", dec!(4096))]),
            occupied_slots: ResourceSlot::from([("cpu", dec!(2))]),
            scaling_group: "default".into(),
            container_count: 1,
        };
        let mut tracker = AgentStateTracker::new(agent);
        assert!(!tracker.has_reservations());

        tracker.apply_diff(&ResourceSlot::from([("cpu", dec!(1.5)), ("mem", dec!(1024))]), 2);
        assert!(tracker.has_reservations());
        assert_eq!(tracker.current_occupied_slots().get("cpu"), dec!(3.5));
        assert_eq!(tracker.current_container_count(), 3);
        assert_eq!(tracker.remaining_slots().get("cpu"), dec!(4.5));
        assert_eq!(tracker.remaining_slots().get("mem"), dec!(3072));
        // Original snapshot is untouched.
        assert_eq!(tracker.original.occupied_slots.get("cpu"), dec!(2));
    }
}
