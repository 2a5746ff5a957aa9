//! The filtering layer around a [`SelectionStrategy`].
//!
//! For each requirement of a session the selector narrows the agents down
//! to those with the right architecture, then to those with enough
//! remaining capacity and container headroom, honours designated agents,
//! and only then asks the strategy to choose. Reservations are applied to
//! a scratch copy of the trackers and committed only when every
//! requirement of the session found an agent.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use slotgrid_core::AgentId;

use crate::agent::{
    AgentSelection, AgentSelectionConfig, AgentSelectionCriteria, AgentStateTracker,
    ResourceRequirements,
};
use crate::error::{SelectionError, SelectionResult};
use crate::strategy::SelectionStrategy;

#[derive(Debug, Clone)]
pub struct AgentSelector {
    strategy: SelectionStrategy,
}

impl AgentSelector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &SelectionStrategy {
        &self.strategy
    }

    /// Select one agent per requirement of the session described by `criteria`.
    ///
    /// On success `trackers` carry the new reservations; on failure they are
    /// left exactly as they were.
    pub fn select_agents_for_batch_requirements(
        &self,
        trackers: &mut [AgentStateTracker],
        criteria: &AgentSelectionCriteria,
        config: &AgentSelectionConfig,
        designated_agent_ids: &[AgentId],
    ) -> SelectionResult<Vec<AgentSelection>> {
        let requirements = criteria.resource_requirements()?;
        if requirements.is_empty() {
            return Ok(Vec::new());
        }
        if trackers.is_empty() {
            return Err(SelectionError::NoAvailableAgent(format!(
                "no agents in resource group {:?}",
                criteria.session_metadata.scaling_group
            )));
        }

        let mut scratch = trackers.to_vec();
        let mut selections = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            let idx = self.select_tracker(
                &scratch,
                &requirement,
                criteria,
                config,
                designated_agent_ids,
            )?;
            let tracker = &mut scratch[idx];
            tracker.apply_diff(&requirement.requested_slots, requirement.kernel_ids.len() as u32);
            debug!(
                session_id = %criteria.session_metadata.session_id,
                agent = %tracker.agent_id(),
                strategy = %self.strategy.kind(),
                kernels = requirement.kernel_ids.len(),
                "agent selected"
            );
            selections.push(AgentSelection {
                agent_id: tracker.original.agent_id.clone(),
                agent_addr: tracker.original.agent_addr.clone(),
                resource_requirements: requirement,
            });
        }

        trackers.clone_from_slice(&scratch);
        Ok(selections)
    }

    /// Index into `trackers` of the agent chosen for one requirement.
    fn select_tracker(
        &self,
        trackers: &[AgentStateTracker],
        requirement: &ResourceRequirements,
        criteria: &AgentSelectionCriteria,
        config: &AgentSelectionConfig,
        designated_agent_ids: &[AgentId],
    ) -> SelectionResult<usize> {
        // First pass: architecture.
        let arch_compatible: Vec<usize> = trackers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.original.architecture == requirement.required_architecture)
            .map(|(i, _)| i)
            .collect();
        if arch_compatible.is_empty() {
            let available: BTreeSet<&str> = trackers
                .iter()
                .map(|t| t.original.architecture.as_str())
                .collect();
            return Err(SelectionError::NoCompatibleAgent {
                required: requirement.required_architecture.clone(),
                available: available.into_iter().map(String::from).collect(),
            });
        }

        // Second pass: capacity and container headroom.
        let mut compatible = Vec::new();
        let mut reasons: BTreeMap<String, u32> = BTreeMap::new();
        let mut agent_reasons: BTreeMap<&str, String> = BTreeMap::new();
        for idx in arch_compatible {
            let tracker = &trackers[idx];
            match check_capacity(tracker, requirement, config) {
                Ok(()) => compatible.push(idx),
                Err(reason) => {
                    *reasons.entry(reason.clone()).or_default() += 1;
                    agent_reasons.insert(tracker.agent_id(), reason);
                }
            }
        }
        if compatible.is_empty() {
            let summary = reasons
                .iter()
                .map(|(reason, count)| format!("{count}x {reason}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SelectionError::NoAvailableAgent(summary));
        }

        if !designated_agent_ids.is_empty() {
            if let Some(&idx) = compatible
                .iter()
                .find(|&&i| designated_agent_ids.iter().any(|d| d == trackers[i].agent_id()))
            {
                return Ok(idx);
            }
            let details = designated_agent_ids
                .iter()
                .map(|id| match agent_reasons.get(id.as_str()) {
                    Some(reason) => format!("{id}: {reason}"),
                    None => format!("{id}: not found"),
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SelectionError::DesignatedAgentUnavailable {
                designated: designated_agent_ids.to_vec(),
                details,
            });
        }

        let candidates: Vec<&AgentStateTracker> = compatible.iter().map(|&i| &trackers[i]).collect();
        let chosen = self
            .strategy
            .select(&candidates, criteria, config)
            .ok_or_else(|| SelectionError::NoAvailableAgent("no candidate chosen".to_string()))?;
        compatible
            .into_iter()
            .find(|&i| std::ptr::eq(&trackers[i], chosen))
            .ok_or_else(|| SelectionError::NoAvailableAgent("chosen agent vanished".to_string()))
    }
}

/// Why an agent cannot take a requirement right now, if it cannot.
fn check_capacity(
    tracker: &AgentStateTracker,
    requirement: &ResourceRequirements,
    config: &AgentSelectionConfig,
) -> Result<(), String> {
    let remaining = tracker.remaining_slots();
    if !requirement.requested_slots.fits_within_available(&remaining) {
        let short = requirement.requested_slots.exceeding_keys(&remaining);
        return Err(format!("insufficient {}", short.join(", ")));
    }
    if let Some(max) = config.max_container_count {
        if tracker.current_container_count() >= max {
            return Err(format!("container limit reached (max {max})"));
        }
    }
    Ok(())
}
