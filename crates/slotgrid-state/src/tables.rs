//! redb table definitions for the slotgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

use crate::types::{FairShareLevel, HistoryScope};

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Session scheduling history keyed by `{session_id}:{entry_id}`.
pub const SESSION_HISTORY: JsonTable = TableDefinition::new("session_scheduling_history");

/// Kernel scheduling history keyed by `{kernel_id}:{entry_id}`.
pub const KERNEL_HISTORY: JsonTable = TableDefinition::new("kernel_scheduling_history");

/// Deployment history keyed by `{deployment_id}:{entry_id}`.
pub const DEPLOYMENT_HISTORY: JsonTable = TableDefinition::new("deployment_history");

/// Route history keyed by `{route_id}:{entry_id}`.
pub const ROUTE_HISTORY: JsonTable = TableDefinition::new("route_history");

/// Domain fair shares keyed by `{resource_group}/{domain_name}`.
pub const DOMAIN_FAIR_SHARES: JsonTable = TableDefinition::new("domain_fair_shares");

/// Project fair shares keyed by `{resource_group}/{project_id}`.
pub const PROJECT_FAIR_SHARES: JsonTable = TableDefinition::new("project_fair_shares");

/// User fair shares keyed by `{resource_group}/{user_uuid}:{project_id}`.
pub const USER_FAIR_SHARES: JsonTable = TableDefinition::new("user_fair_shares");

pub fn history_table(scope: HistoryScope) -> JsonTable {
    match scope {
        HistoryScope::Session => SESSION_HISTORY,
        HistoryScope::Kernel => KERNEL_HISTORY,
        HistoryScope::Deployment => DEPLOYMENT_HISTORY,
        HistoryScope::Route => ROUTE_HISTORY,
    }
}

pub fn fair_share_table(level: FairShareLevel) -> JsonTable {
    match level {
        FairShareLevel::Domain => DOMAIN_FAIR_SHARES,
        FairShareLevel::Project => PROJECT_FAIR_SHARES,
        FairShareLevel::User => USER_FAIR_SHARES,
    }
}
