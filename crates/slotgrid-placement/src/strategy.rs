//! Agent selection strategies.
//!
//! Each strategy picks one agent from a non-empty, already filtered set of
//! candidates. All of them are deterministic: the result depends only on
//! the candidates and the arguments, and the last tie-breaker is always the
//! agent id in ascending order.
//!
//! - **Concentrated** packs work onto the agent with the *least* remaining
//!   capacity, comparing resources in priority order.
//! - **Dispersed** spreads work onto the agent with the *most* remaining
//!   capacity.
//! - **RoundRobin** ignores load and rotates through agents sorted by id.
//! - **Legacy** compares like Concentrated, but only on the exact resource
//!   names of its priority list.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use rust_decimal::Decimal;

use slotgrid_core::AgentSelectionStrategy;

use crate::agent::{AgentSelectionConfig, AgentSelectionCriteria, AgentStateTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionStrategy {
    Concentrated { resource_priority: Vec<String> },
    Dispersed { resource_priority: Vec<String> },
    /// `next_index` is owned and advanced by the caller.
    RoundRobin { next_index: usize },
    Legacy { resource_priority: Vec<String> },
}

impl SelectionStrategy {
    pub fn from_kind(
        kind: AgentSelectionStrategy,
        resource_priority: Vec<String>,
        next_index: usize,
    ) -> Self {
        match kind {
            AgentSelectionStrategy::Concentrated => {
                SelectionStrategy::Concentrated { resource_priority }
            }
            AgentSelectionStrategy::Dispersed => SelectionStrategy::Dispersed { resource_priority },
            AgentSelectionStrategy::RoundRobin => SelectionStrategy::RoundRobin { next_index },
            AgentSelectionStrategy::Legacy => SelectionStrategy::Legacy { resource_priority },
        }
    }

    pub fn kind(&self) -> AgentSelectionStrategy {
        match self {
            SelectionStrategy::Concentrated { .. } => AgentSelectionStrategy::Concentrated,
            SelectionStrategy::Dispersed { .. } => AgentSelectionStrategy::Dispersed,
            SelectionStrategy::RoundRobin { .. } => AgentSelectionStrategy::RoundRobin,
            SelectionStrategy::Legacy { .. } => AgentSelectionStrategy::Legacy,
        }
    }

    /// Pick one candidate. Returns `None` only for an empty candidate list.
    pub fn select<'a>(
        &self,
        candidates: &[&'a AgentStateTracker],
        criteria: &AgentSelectionCriteria,
        config: &AgentSelectionConfig,
    ) -> Option<&'a AgentStateTracker> {
        match self {
            SelectionStrategy::Concentrated { resource_priority } => {
                select_concentrated(candidates, resource_priority, criteria, config)
            }
            SelectionStrategy::Dispersed { resource_priority } => {
                select_dispersed(candidates, resource_priority, criteria, config)
            }
            SelectionStrategy::RoundRobin { next_index } => {
                select_round_robin(candidates, *next_index)
            }
            SelectionStrategy::Legacy { resource_priority } => {
                select_legacy(candidates, resource_priority)
            }
        }
    }
}

// ── Strategies ─────────────────────────────────────────────────────

/// Candidate at `next_index mod n` after sorting by agent id.
pub fn select_round_robin<'a>(
    candidates: &[&'a AgentStateTracker],
    next_index: usize,
) -> Option<&'a AgentStateTracker> {
    if candidates.is_empty() {
        return None;
    }
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| a.agent_id().cmp(b.agent_id()));
    sorted.get(next_index % sorted.len()).copied()
}

pub fn select_concentrated<'a>(
    candidates: &[&'a AgentStateTracker],
    resource_priority: &[String],
    criteria: &AgentSelectionCriteria,
    config: &AgentSelectionConfig,
) -> Option<&'a AgentStateTracker> {
    let keys = expand_priority(candidates, resource_priority);
    pick(candidates, &keys, endpoint_spreading(criteria, config), Ordering::Less)
}

pub fn select_dispersed<'a>(
    candidates: &[&'a AgentStateTracker],
    resource_priority: &[String],
    criteria: &AgentSelectionCriteria,
    config: &AgentSelectionConfig,
) -> Option<&'a AgentStateTracker> {
    let keys = expand_priority(candidates, resource_priority);
    pick(candidates, &keys, endpoint_spreading(criteria, config), Ordering::Greater)
}

/// Least remaining capacity over the literal names of `resource_priority`.
pub fn select_legacy<'a>(
    candidates: &[&'a AgentStateTracker],
    resource_priority: &[String],
) -> Option<&'a AgentStateTracker> {
    let mut seen = BTreeSet::new();
    let keys: Vec<String> = resource_priority
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect();
    pick(candidates, &keys, None, Ordering::Less)
}

// ── Comparison helpers ─────────────────────────────────────────────

/// Resolve priority entries to concrete slot names.
///
/// An entry matches a slot name equal to it or nested under it (`cuda`
/// matches `cuda.device` and `cuda.shares`). Matches of one entry are
/// ordered by name; entries matching nothing are dropped.
fn expand_priority(candidates: &[&AgentStateTracker], resource_priority: &[String]) -> Vec<String> {
    let universe: BTreeSet<&str> = candidates
        .iter()
        .flat_map(|t| t.original.available_slots.keys())
        .collect();
    let mut taken = BTreeSet::new();
    let mut keys = Vec::new();
    for entry in resource_priority {
        let nested = format!("{entry}.");
        for name in &universe {
            if (*name == entry.as_str() || name.starts_with(&nested)) && taken.insert(*name) {
                keys.push(name.to_string());
            }
        }
    }
    keys
}

/// Endpoint replica counts lead the comparison when spreading is enforced.
fn endpoint_spreading<'c>(
    criteria: &'c AgentSelectionCriteria,
    config: &AgentSelectionConfig,
) -> Option<&'c AgentSelectionCriteria> {
    (config.enforce_spreading_endpoint_replica && criteria.kernel_counts_at_endpoint.is_some())
        .then_some(criteria)
}

/// Pick the candidate whose remaining capacity over `keys` is extreme in
/// the `prefer` direction (`Less` = least remaining).
fn pick<'a>(
    candidates: &[&'a AgentStateTracker],
    keys: &[String],
    endpoint: Option<&AgentSelectionCriteria>,
    prefer: Ordering,
) -> Option<&'a AgentStateTracker> {
    let scored: Vec<(&'a AgentStateTracker, u32, Vec<Decimal>)> = candidates
        .iter()
        .map(|t| {
            let remaining = t.remaining_slots();
            let replicas = endpoint.map_or(0, |c| c.endpoint_kernel_count(t.agent_id()));
            let values = keys.iter().map(|k| remaining.get(k)).collect();
            (*t, replicas, values)
        })
        .collect();

    scored
        .into_iter()
        .min_by(|(a, a_replicas, a_values), (b, b_replicas, b_values)| {
            let capacity = a_values.cmp(b_values);
            let capacity = if prefer == Ordering::Less {
                capacity
            } else {
                capacity.reverse()
            };
            a_replicas
                .cmp(b_replicas)
                .then(capacity)
                .then_with(|| a.agent_id().cmp(b.agent_id()))
        })
        .map(|(t, _, _)| t)
}
