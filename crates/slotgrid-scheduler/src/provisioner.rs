//! Provisioner: runs one scheduling cycle for one resource group.
//!
//! The cycle:
//! - Sequences the pending workloads with the group's sequencer
//! - Validates each workload against the snapshot as updated by the
//!   allocations made earlier in the same cycle
//! - Selects agents on cycle-local trackers and lays out the kernels
//! - Records every attempt in the scheduling history
//!
//! Recoverable errors (rejections, exhausted agents) leave the workload
//! pending and the cycle continues. Any other error aborts the cycle after
//! the attempts so far have been recorded.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use slotgrid_core::config::ResourceGroupConfig;
use slotgrid_core::{
    AgentSelectionStrategy, ResourceGroupName, SchedulingResult, SessionStatus, SlotgridConfig,
};
use slotgrid_placement::{
    AgentInfo, AgentSelectionConfig, AgentSelector, AgentStateTracker, SelectionStrategy,
};
use slotgrid_state::HistoryScope;

use crate::allocation::{ScheduleResult, SchedulingFailure, SessionAllocation};
use crate::cursor::RoundRobinCursor;
use crate::error::{SchedulerError, SchedulerResult};
use crate::fair_share::FairShareRanking;
use crate::history::{HistoryAttempt, SchedulingHistoryRecorder};
use crate::recorder::{ExecutionRecord, Phase};
use crate::sequencers::sequencer_for;
use crate::snapshot::SystemSnapshot;
use crate::validators::SchedulingValidator;
use crate::workload::SessionWorkload;

/// Phase name of history rows written by the provisioner.
pub const SCHEDULING_PHASE: &str = "scheduling";

/// Everything one cycle of one resource group needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingCycle {
    pub resource_group: ResourceGroupName,
    pub snapshot: SystemSnapshot,
    pub workloads: Vec<SessionWorkload>,
    pub agents: Vec<AgentInfo>,
    /// Required by the fair-share sequencer; absent means nobody is ranked.
    #[serde(default)]
    pub ranking: Option<FairShareRanking>,
}

pub struct Provisioner {
    config: Arc<SlotgridConfig>,
    validator: SchedulingValidator,
    history: SchedulingHistoryRecorder,
    /// resource group → round-robin cursor.
    cursors: RwLock<HashMap<String, Arc<RoundRobinCursor>>>,
}

impl Provisioner {
    pub fn new(config: Arc<SlotgridConfig>, history: SchedulingHistoryRecorder) -> Self {
        Self {
            config,
            validator: SchedulingValidator::default(),
            history,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_validator(mut self, validator: SchedulingValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn history(&self) -> &SchedulingHistoryRecorder {
        &self.history
    }

    /// The round-robin cursor of `resource_group`, created on first use.
    pub async fn cursor(&self, resource_group: &str) -> Arc<RoundRobinCursor> {
        {
            let cursors = self.cursors.read().await;
            if let Some(cursor) = cursors.get(resource_group) {
                return cursor.clone();
            }
        }
        let mut cursors = self.cursors.write().await;
        cursors
            .entry(resource_group.to_string())
            .or_default()
            .clone()
    }

    fn group_config(&self, resource_group: &str) -> ResourceGroupConfig {
        self.config
            .resource_group(resource_group)
            .cloned()
            .unwrap_or_else(|| ResourceGroupConfig::new(resource_group))
    }

    /// Run one scheduling cycle.
    pub async fn schedule_resource_group(
        &self,
        cycle: SchedulingCycle,
    ) -> SchedulerResult<ScheduleResult> {
        let SchedulingCycle {
            resource_group,
            snapshot,
            workloads,
            agents,
            ranking,
        } = cycle;
        snapshot.check()?;

        let cursor = self.cursor(&resource_group).await;
        let group = self.group_config(&resource_group);
        let resource_priority = self.config.resource_priority_for(&group);
        let selection_config = AgentSelectionConfig {
            max_container_count: group.max_container_count,
            enforce_spreading_endpoint_replica: group.enforce_spreading_endpoint_replica,
        };

        let pending = workloads.len();
        let sequencer = sequencer_for(group.sequencer, ranking);
        let ordered = sequencer.sequence(&snapshot, workloads);
        info!(
            resource_group = %resource_group,
            sequencer = sequencer.name(),
            strategy = %group.agent_selection_strategy,
            pending,
            agents = agents.len(),
            "scheduling cycle started"
        );

        let mut trackers: Vec<AgentStateTracker> =
            agents.into_iter().map(AgentStateTracker::new).collect();
        let mut working = snapshot;
        let mut result = ScheduleResult {
            resource_group: resource_group.clone(),
            ..Default::default()
        };
        let mut session_attempts = Vec::with_capacity(ordered.len());
        let mut kernel_attempts = Vec::new();
        let mut fatal = None;

        for workload in ordered {
            let mut record = ExecutionRecord::new();
            let strategy = SelectionStrategy::from_kind(
                group.agent_selection_strategy,
                resource_priority.clone(),
                cursor.current(),
            );
            let outcome = self.schedule_workload(
                &working,
                &workload,
                &mut trackers,
                &strategy,
                &selection_config,
                &mut record,
            );
            match outcome {
                Ok(allocation) => {
                    if strategy.kind() == AgentSelectionStrategy::RoundRobin {
                        cursor.advance();
                    }
                    info!(
                        resource_group = %resource_group,
                        session_id = %allocation.session_id,
                        agents = %allocation.agent_ids().join(","),
                        kernels = allocation.kernel_allocations.len(),
                        "session scheduled"
                    );
                    session_attempts.push(scheduled_attempt(&allocation, record.into_sub_steps()));
                    kernel_attempts.extend(kernel_attempts_for(&allocation));
                    working = working.with_allocation(&allocation);
                    result.allocations.push(allocation);
                }
                Err(e) if e.is_recoverable() => {
                    debug!(
                        resource_group = %resource_group,
                        session_id = %workload.session_id,
                        code = e.error_code(),
                        reason = %e.reason(),
                        "session left pending"
                    );
                    session_attempts.push(failed_attempt(&workload, &e, record.into_sub_steps()));
                    result.failures.push(SchedulingFailure {
                        session_id: workload.session_id,
                        error_code: e.error_code().to_string(),
                        message: e.reason(),
                    });
                }
                Err(e) => {
                    warn!(
                        resource_group = %resource_group,
                        session_id = %workload.session_id,
                        error = %e,
                        "scheduling cycle aborted"
                    );
                    session_attempts.push(failed_attempt(&workload, &e, record.into_sub_steps()));
                    fatal = Some(e);
                    break;
                }
            }
        }

        // The store may block on disk I/O and retry with sleeps.
        let history = self.history.clone();
        tokio::task::spawn_blocking(move || -> SchedulerResult<()> {
            history.record_batch(HistoryScope::Session, &session_attempts)?;
            history.record_batch(HistoryScope::Kernel, &kernel_attempts)?;
            Ok(())
        })
        .await
        .map_err(|e| SchedulerError::HistoryWrite(e.to_string()))??;
        if let Some(e) = fatal {
            return Err(e);
        }

        info!(
            resource_group = %resource_group,
            scheduled = result.allocations.len(),
            pending = result.failures.len(),
            "scheduling cycle finished"
        );
        Ok(result)
    }

    fn schedule_workload(
        &self,
        working: &SystemSnapshot,
        workload: &SessionWorkload,
        trackers: &mut [AgentStateTracker],
        strategy: &SelectionStrategy,
        selection_config: &AgentSelectionConfig,
        record: &mut ExecutionRecord,
    ) -> SchedulerResult<SessionAllocation> {
        self.validator.validate_recorded(working, workload, record)?;

        let kernels = workload.resolve_kernels()?;
        let criteria = workload.selection_criteria(&kernels);
        let selector = AgentSelector::new(strategy.clone());
        let selections = record.measure(Phase::AgentSelection, strategy.kind().as_str(), || {
            selector.select_agents_for_batch_requirements(
                trackers,
                &criteria,
                selection_config,
                &workload.designated_agent_ids,
            )
        })?;

        record.measure(Phase::Allocation, "cluster_configuration", || {
            SessionAllocation::build(workload, &kernels, &selections)
        })
    }
}

fn scheduled_attempt(
    allocation: &SessionAllocation,
    sub_steps: Vec<slotgrid_state::SubStepResult>,
) -> HistoryAttempt {
    HistoryAttempt::new(
        HistoryScope::Session,
        allocation.session_id.to_string(),
        SCHEDULING_PHASE,
        SchedulingResult::Success,
    )
    .with_status(
        Some(SessionStatus::Pending.as_str()),
        Some(SessionStatus::Scheduled.as_str()),
    )
    .with_message(format!(
        "scheduled on {}",
        allocation.agent_ids().join(", ")
    ))
    .with_sub_steps(sub_steps)
}

fn kernel_attempts_for(allocation: &SessionAllocation) -> Vec<HistoryAttempt> {
    allocation
        .kernel_allocations
        .iter()
        .map(|kernel| {
            HistoryAttempt::new(
                HistoryScope::Kernel,
                kernel.kernel_id.to_string(),
                SCHEDULING_PHASE,
                SchedulingResult::Success,
            )
            .with_status(
                Some(SessionStatus::Pending.as_str()),
                Some(SessionStatus::Scheduled.as_str()),
            )
            .with_message(format!(
                "assigned to {} as {}",
                kernel.agent_id, kernel.cluster.cluster_hostname
            ))
        })
        .collect()
}

fn failed_attempt(
    workload: &SessionWorkload,
    error: &SchedulerError,
    sub_steps: Vec<slotgrid_state::SubStepResult>,
) -> HistoryAttempt {
    HistoryAttempt::new(
        HistoryScope::Session,
        workload.session_id.to_string(),
        SCHEDULING_PHASE,
        SchedulingResult::Failure,
    )
    .with_status(
        Some(SessionStatus::Pending.as_str()),
        Some(SessionStatus::Pending.as_str()),
    )
    .with_error_code(error.error_code())
    .with_message(error.reason())
    .with_sub_steps(sub_steps)
}
