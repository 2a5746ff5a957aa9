//! Domain types persisted in the slotgrid state store.
//!
//! These are serialized as JSON into redb `&[u8]` values.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use slotgrid_core::config::FairShareConfig;
use slotgrid_core::{CoreError, ProjectId, ResourceSlot, SchedulingResult, UserId};

// ── Scheduling history ─────────────────────────────────────────────

/// Which timeline a history entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    Session,
    Kernel,
    Deployment,
    Route,
}

impl HistoryScope {
    pub const ALL: [HistoryScope; 4] = [
        HistoryScope::Session,
        HistoryScope::Kernel,
        HistoryScope::Deployment,
        HistoryScope::Route,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryScope::Session => "session",
            HistoryScope::Kernel => "kernel",
            HistoryScope::Deployment => "deployment",
            HistoryScope::Route => "route",
        }
    }
}

impl fmt::Display for HistoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryScope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HistoryScope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| CoreError::invalid_registry_type("history scope", s))
    }
}

/// Outcome of one named step inside a scheduling attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStepResult {
    pub step: String,
    pub result: SchedulingResult,
    pub error_code: Option<String>,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// One row of a scope's scheduling timeline.
///
/// Consecutive attempts that agree on `(phase, error_code, to_status)` share
/// a row and bump `attempts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingHistoryEntry {
    pub id: Uuid,
    pub scope: HistoryScope,
    pub scope_id: String,
    pub phase: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub result: SchedulingResult,
    pub error_code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub sub_steps: Vec<SubStepResult>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchedulingHistoryEntry {
    /// Composite key: `{scope_id}:{id}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.scope_id, self.id)
    }

    /// Fields that decide whether a new attempt merges into this row.
    pub fn merge_key(&self) -> (&str, Option<&str>, Option<&str>) {
        (
            self.phase.as_str(),
            self.error_code.as_deref(),
            self.to_status.as_deref(),
        )
    }
}

/// Filters and pagination for [`crate::StateStore::search_history`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub scope: HistoryScope,
    pub scope_id: Option<String>,
    pub result: Option<SchedulingResult>,
    pub phase: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl HistoryQuery {
    pub fn new(scope: HistoryScope) -> Self {
        Self {
            scope,
            scope_id: None,
            result: None,
            phase: None,
            offset: 0,
            limit: 50,
        }
    }

    pub fn matches(&self, entry: &SchedulingHistoryEntry) -> bool {
        self.scope_id.as_deref().is_none_or(|id| entry.scope_id == id)
            && self.result.is_none_or(|r| entry.result == r)
            && self.phase.as_deref().is_none_or(|p| entry.phase == p)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<T> Page<T> {
    /// Slice an already-ordered result set.
    pub fn from_ordered(all: Vec<T>, offset: usize, limit: usize) -> Self {
        let total_count = all.len();
        let items: Vec<T> = all.into_iter().skip(offset).take(limit).collect();
        Self {
            has_next_page: offset.saturating_add(items.len()) < total_count,
            has_previous_page: offset > 0,
            items,
            total_count,
        }
    }
}

// ── Fair share ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairShareLevel {
    Domain,
    Project,
    User,
}

impl FairShareLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FairShareLevel::Domain => "domain",
            FairShareLevel::Project => "project",
            FairShareLevel::User => "user",
        }
    }
}

impl FromStr for FairShareLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(FairShareLevel::Domain),
            "project" => Ok(FairShareLevel::Project),
            "user" => Ok(FairShareLevel::User),
            other => Err(CoreError::invalid_registry_type("fair share level", other)),
        }
    }
}

/// A user's membership in one project; users are tracked per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserProjectKey {
    pub user_uuid: UserId,
    pub project_id: ProjectId,
}

impl fmt::Display for UserProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_uuid, self.project_id)
    }
}

/// Unique identity of a fair-share record inside its table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum FairShareKey {
    Domain {
        resource_group: String,
        domain_name: String,
    },
    Project {
        resource_group: String,
        project_id: ProjectId,
    },
    User {
        resource_group: String,
        user: UserProjectKey,
    },
}

impl FairShareKey {
    pub fn level(&self) -> FairShareLevel {
        match self {
            FairShareKey::Domain { .. } => FairShareLevel::Domain,
            FairShareKey::Project { .. } => FairShareLevel::Project,
            FairShareKey::User { .. } => FairShareLevel::User,
        }
    }

    pub fn resource_group(&self) -> &str {
        match self {
            FairShareKey::Domain { resource_group, .. }
            | FairShareKey::Project { resource_group, .. }
            | FairShareKey::User { resource_group, .. } => resource_group,
        }
    }

    pub fn table_key(&self) -> String {
        match self {
            FairShareKey::Domain {
                resource_group,
                domain_name,
            } => format!("{resource_group}/{domain_name}"),
            FairShareKey::Project {
                resource_group,
                project_id,
            } => format!("{resource_group}/{project_id}"),
            FairShareKey::User {
                resource_group,
                user,
            } => format!("{resource_group}/{user}"),
        }
    }
}

/// Configured fairness parameters of one scope, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairShareSpec {
    pub weight: Decimal,
    pub half_life_days: u32,
    pub lookback_days: u32,
    pub decay_unit_days: u32,
    pub resource_weights: ResourceSlot,
}

/// Result of the most recent factor calculation for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairShareCalculationSnapshot {
    pub fair_share_factor: Decimal,
    pub total_decayed_usage: ResourceSlot,
    pub normalized_usage: Decimal,
    pub lookback_start: NaiveDate,
    pub lookback_end: NaiveDate,
    pub last_calculated_at: DateTime<Utc>,
}

/// Stored fair-share record.
///
/// `weight` is `None` when the scope follows the resource group default, and
/// `resource_weights` holds explicit per-resource overrides only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairShareRow {
    pub key: FairShareKey,
    pub domain_name: String,
    pub weight: Option<Decimal>,
    #[serde(default)]
    pub resource_weights: ResourceSlot,
    pub half_life_days: u32,
    pub lookback_days: u32,
    pub decay_unit_days: u32,
    pub calculation: Option<FairShareCalculationSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read model of a fair-share record with defaults filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairShareData {
    pub key: FairShareKey,
    pub domain_name: String,
    pub spec: FairShareSpec,
    pub calculation: Option<FairShareCalculationSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The weight came from the resource group default.
    pub use_default: bool,
    /// Resource types whose weight came from the default.
    pub uses_default_resources: BTreeSet<String>,
}

impl FairShareRow {
    /// A fresh record following every default in `config`.
    pub fn new(
        key: FairShareKey,
        domain_name: impl Into<String>,
        config: &FairShareConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            domain_name: domain_name.into(),
            weight: None,
            resource_weights: ResourceSlot::new(),
            half_life_days: config.half_life_days,
            lookback_days: config.lookback_days,
            decay_unit_days: config.decay_unit_days,
            calculation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_data(&self, default_weight: Decimal, available_slots: &ResourceSlot) -> FairShareData {
        let (resource_weights, uses_default_resources) =
            merge_resource_weights(&self.resource_weights, default_weight, available_slots);
        FairShareData {
            key: self.key.clone(),
            domain_name: self.domain_name.clone(),
            spec: FairShareSpec {
                weight: self.weight.unwrap_or(default_weight),
                half_life_days: self.half_life_days,
                lookback_days: self.lookback_days,
                decay_unit_days: self.decay_unit_days,
                resource_weights,
            },
            calculation: self.calculation.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            use_default: self.weight.is_none(),
            uses_default_resources,
        }
    }

    /// Replace the calculation result, leaving configured values untouched.
    pub fn with_calculation(self, snapshot: FairShareCalculationSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            calculation: Some(snapshot),
            updated_at: now,
            ..self
        }
    }
}

fn merge_resource_weights(
    explicit: &ResourceSlot,
    default_weight: Decimal,
    available_slots: &ResourceSlot,
) -> (ResourceSlot, BTreeSet<String>) {
    let mut merged = ResourceSlot::new();
    let mut defaulted = BTreeSet::new();
    for slot_type in available_slots.keys() {
        match explicit.get_explicit(slot_type) {
            Some(weight) => merged.insert(slot_type, weight),
            None => {
                merged.insert(slot_type, default_weight);
                defaulted.insert(slot_type.to_string());
            }
        }
    }
    (merged, defaulted)
}
