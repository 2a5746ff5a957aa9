//! slotgrid.toml configuration parser.
//!
//! ```toml
//! [scheduler]
//! agent_selection_resource_priority = ["cuda", "rocm", "tpu", "cpu", "mem"]
//!
//! [fair_share]
//! half_life_days = 7
//! lookback_days = 28
//!
//! [history.retry]
//! max_attempts = 3
//! backoff = { kind = "exponential", base_ms = 20, max_ms = 500 }
//!
//! [[resource_groups]]
//! name = "default"
//! sequencer = "fair-share"
//! agent_selection_strategy = "dispersed"
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::resource::ResourceSlot;
use crate::types::{AgentSelectionStrategy, SequencerKind};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotgridConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fair_share: FairShareConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub resource_groups: Vec<ResourceGroupConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_resource_priority")]
    pub agent_selection_resource_priority: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            agent_selection_resource_priority: default_resource_priority(),
        }
    }
}

pub fn default_resource_priority() -> Vec<String> {
    ["cuda", "rocm", "tpu", "cpu", "mem"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Longest usage window `[fair_share].lookback_days` may ask for.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairShareConfig {
    pub default_weight: Decimal,
    pub half_life_days: u32,
    pub lookback_days: u32,
    pub decay_unit_days: u32,
    pub usage_scale: Decimal,
    /// Per-resource weights; the calculator's built-in table applies when unset.
    pub resource_weights: Option<ResourceSlot>,
}

impl Default for FairShareConfig {
    fn default() -> Self {
        Self {
            default_weight: Decimal::ONE,
            half_life_days: 7,
            lookback_days: 28,
            decay_unit_days: 1,
            usage_scale: Decimal::from(86_400),
            resource_weights: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// How often and how patiently a storage read-modify-write is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base_ms: 20,
                max_ms: 500,
            },
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed { delay_ms: 0 },
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay_after(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                let delay = base_ms.saturating_mul(1u64 << shift);
                Duration::from_millis(delay.min(max_ms))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupConfig {
    pub name: String,
    #[serde(default)]
    pub sequencer: SequencerKind,
    #[serde(default)]
    pub agent_selection_strategy: AgentSelectionStrategy,
    /// Overrides `[scheduler].agent_selection_resource_priority` for this group.
    pub agent_selection_resource_priority: Option<Vec<String>>,
    pub max_container_count: Option<u32>,
    #[serde(default)]
    pub enforce_spreading_endpoint_replica: bool,
}

impl ResourceGroupConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequencer: SequencerKind::default(),
            agent_selection_strategy: AgentSelectionStrategy::default(),
            agent_selection_resource_priority: None,
            max_container_count: None,
            enforce_spreading_endpoint_replica: false,
        }
    }
}

impl SlotgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: SlotgridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let fs = &self.fair_share;
        if fs.half_life_days == 0 {
            return Err(CoreError::InvalidConfig(
                "fair_share.half_life_days must be positive".into(),
            ));
        }
        if fs.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(CoreError::InvalidConfig(format!(
                "fair_share.lookback_days must be at most {MAX_LOOKBACK_DAYS}"
            )));
        }
        if fs.usage_scale <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig(
                "fair_share.usage_scale must be positive".into(),
            ));
        }
        if fs.default_weight <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig(
                "fair_share.default_weight must be positive".into(),
            ));
        }
        if self.history.retry.max_attempts == 0 {
            return Err(CoreError::InvalidConfig(
                "history.retry.max_attempts must be at least 1".into(),
            ));
        }
        let mut seen = HashSet::new();
        for group in &self.resource_groups {
            if !seen.insert(group.name.as_str()) {
                return Err(CoreError::InvalidConfig(format!(
                    "duplicate resource group {:?}",
                    group.name
                )));
            }
        }
        Ok(())
    }

    pub fn resource_group(&self, name: &str) -> Option<&ResourceGroupConfig> {
        self.resource_groups.iter().find(|g| g.name == name)
    }

    /// Resource priority used by a group's selector, falling back to the global list.
    pub fn resource_priority_for(&self, group: &ResourceGroupConfig) -> Vec<String> {
        group
            .agent_selection_resource_priority
            .clone()
            .unwrap_or_else(|| self.scheduler.agent_selection_resource_priority.clone())
    }
}
