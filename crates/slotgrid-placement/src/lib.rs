//! slotgrid agent placement: choosing agents and laying out kernels.
//!
//! This crate decides where the kernels of one session run. It does NOT
//! decide which session goes next (that's `slotgrid-scheduler`). Given the
//! agents of a resource group and a session's kernel requirements it
//! filters compatible agents, delegates the final choice to a strategy and
//! records provisional reservations so later selections in the same cycle
//! see the updated load.
//!
//! # Components
//!
//! - **`agent`**: Agent snapshots, cycle-local trackers, requirement types
//! - **`strategy`**: Concentrated, dispersed, round-robin and legacy choice
//! - **`selector`**: Architecture/capacity filtering and designated agents
//! - **`cluster`**: Cluster role, index, rank and hostname assignment

pub mod agent;
pub mod cluster;
pub mod error;
pub mod selector;
pub mod strategy;

pub use agent::{
    AgentInfo, AgentSelection, AgentSelectionConfig, AgentSelectionCriteria, AgentStateTracker,
    KernelResourceSpec, ResourceRequirements, SessionMetadata,
};
pub use cluster::{ClusterConfigurationRule, KernelClusterConfig, KernelClusterSpec};
pub use error::{SelectionError, SelectionResult};
pub use selector::AgentSelector;
pub use strategy::SelectionStrategy;
