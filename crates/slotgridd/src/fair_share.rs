//! `fair-share`: recalculate fair-share factors from daily usage.
//!
//! The usage file lists per-user daily usage. Each record counts toward its
//! domain, its project and the user within that project. Existing records
//! keep their configured weights; scopes seen for the first time get a
//! record that follows every default.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use slotgrid_core::{DomainName, ProjectId, ResourceSlot, SlotgridConfig, UserId};
use slotgrid_scheduler::fair_share::{
    aggregate_levels, FairSharesByLevel, RawUsageBucketsByLevel, UserSchedulingRank,
};
use slotgrid_scheduler::FairShareFactorCalculator;
use slotgrid_state::{FairShareKey, FairShareLevel, FairShareRow, StateStore, UserProjectKey};

#[derive(Debug, Clone, Deserialize)]
pub struct UsageFile {
    #[serde(default)]
    pub today: Option<NaiveDate>,
    /// Slot types the resource group offers; drives per-resource weight defaults.
    #[serde(default)]
    pub available_slots: ResourceSlot,
    pub records: Vec<UsageRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageRecord {
    pub domain_name: DomainName,
    pub project_id: ProjectId,
    pub user_uuid: UserId,
    pub date: NaiveDate,
    pub usage: ResourceSlot,
}

#[derive(Debug, Clone, Serialize)]
pub struct FairShareReport {
    pub resource_group: String,
    pub lookback_start: NaiveDate,
    pub lookback_end: NaiveDate,
    pub records_written: usize,
    pub ranks: Vec<UserSchedulingRank>,
}

pub fn run_fair_share(
    config: &SlotgridConfig,
    store: &StateStore,
    usage_path: &Path,
    resource_group: &str,
    today: Option<NaiveDate>,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(usage_path)
        .with_context(|| format!("read usage file {}", usage_path.display()))?;
    let usage: UsageFile = serde_json::from_str(&content)
        .with_context(|| format!("parse usage file {}", usage_path.display()))?;

    let now = Utc::now();
    let today = today.or(usage.today).unwrap_or_else(|| now.date_naive());
    let report = recalculate(config, store, &usage, resource_group, today, now)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn recalculate(
    config: &SlotgridConfig,
    store: &StateStore,
    usage: &UsageFile,
    resource_group: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> anyhow::Result<FairShareReport> {
    let fs = &config.fair_share;
    let raw = bucket_usage(&usage.records);
    let decayed = aggregate_levels(&raw, today, fs.half_life_days, fs.lookback_days);

    let mut rows = Vec::new();
    for level in [FairShareLevel::Domain, FairShareLevel::Project, FairShareLevel::User] {
        rows.extend(store.list_fair_shares(level, resource_group)?);
    }
    rows.extend(missing_rows(config, &rows, &usage.records, resource_group, now));

    let mut fair_shares = FairSharesByLevel::default();
    for row in &rows {
        let data = row.to_data(fs.default_weight, &usage.available_slots);
        match &row.key {
            FairShareKey::Domain { domain_name, .. } => {
                fair_shares.domain.insert(domain_name.clone(), data);
            }
            FairShareKey::Project { project_id, .. } => {
                fair_shares.project.insert(*project_id, data);
            }
            FairShareKey::User { user, .. } => {
                fair_shares.user.insert(*user, data);
            }
        }
    }

    let lookback_start = today
        .checked_sub_days(Days::new(u64::from(fs.lookback_days)))
        .unwrap_or(today);
    let calculator = FairShareFactorCalculator::from_config(fs);
    let factors = calculator.calculate_factors(&decayed, &fair_shares, lookback_start, today);

    let rows = factors.apply_to_rows(rows, now);
    store.put_fair_shares(&rows)?;
    info!(
        resource_group,
        records = rows.len(),
        ranked_users = factors.scheduling_ranks.len(),
        %today,
        "fair share records updated"
    );

    Ok(FairShareReport {
        resource_group: resource_group.to_string(),
        lookback_start,
        lookback_end: today,
        records_written: rows.len(),
        ranks: factors.scheduling_ranks,
    })
}

fn bucket_usage(records: &[UsageRecord]) -> RawUsageBucketsByLevel {
    let mut raw = RawUsageBucketsByLevel::default();
    for record in records {
        let user = UserProjectKey {
            user_uuid: record.user_uuid,
            project_id: record.project_id,
        };
        *raw.domain
            .entry(record.domain_name.clone())
            .or_default()
            .entry(record.date)
            .or_default() += &record.usage;
        *raw.project
            .entry(record.project_id)
            .or_default()
            .entry(record.date)
            .or_default() += &record.usage;
        *raw.user
            .entry(user)
            .or_default()
            .entry(record.date)
            .or_default() += &record.usage;
    }
    raw
}

/// Default-following rows for scopes that appear in usage but not in the store.
fn missing_rows(
    config: &SlotgridConfig,
    existing: &[FairShareRow],
    records: &[UsageRecord],
    resource_group: &str,
    now: DateTime<Utc>,
) -> Vec<FairShareRow> {
    let mut seen: std::collections::HashSet<FairShareKey> =
        existing.iter().map(|row| row.key.clone()).collect();
    let mut rows = Vec::new();
    for record in records {
        let keys = [
            FairShareKey::Domain {
                resource_group: resource_group.to_string(),
                domain_name: record.domain_name.clone(),
            },
            FairShareKey::Project {
                resource_group: resource_group.to_string(),
                project_id: record.project_id,
            },
            FairShareKey::User {
                resource_group: resource_group.to_string(),
                user: UserProjectKey {
                    user_uuid: record.user_uuid,
                    project_id: record.project_id,
                },
            },
        ];
        for key in keys {
            if seen.insert(key.clone()) {
                rows.push(FairShareRow::new(
                    key,
                    record.domain_name.clone(),
                    &config.fair_share,
                    now,
                ));
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn make_record(user: u128, date: NaiveDate, cpu: rust_decimal::Decimal) -> UsageRecord {
        UsageRecord {
            domain_name: "default".to_string(),
            project_id: Uuid::from_u128(1000),
            user_uuid: Uuid::from_u128(user),
            date,
            usage: ResourceSlot::from([("cpu", cpu)]),
        }
    }

    #[test]
    fn recalculation_creates_records_and_ranks_users() {
        let store = StateStore::open_in_memory().unwrap();
        let config = SlotgridConfig::default();
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap();
        let usage = UsageFile {
            today: None,
            available_slots: ResourceSlot::from([("cpu", dec!(64)), ("mem", dec!(262144))]),
            records: vec![
                make_record(1, yesterday, dec!(864000)),
                make_record(2, yesterday, dec!(86400)),
            ],
        };

        let report =
            recalculate(&config, &store, &usage, "default", today, Utc::now()).unwrap();
        assert_eq!(report.records_written, 4);
        assert_eq!(report.ranks[0].user_uuid, Uuid::from_u128(2));
        assert_eq!(report.ranks[0].rank, 1);

        let users = store.list_fair_shares(FairShareLevel::User, "default").unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().all(|row| row.weight.is_none() && row.calculation.is_some()));
    }

    #[test]
    fn recalculation_keeps_configured_weights() {
        let store = StateStore::open_in_memory().unwrap();
        let config = SlotgridConfig::default();
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let key = FairShareKey::Domain {
            resource_group: "default".to_string(),
            domain_name: "default".to_string(),
        };
        let mut row = FairShareRow::new(key.clone(), "default", &config.fair_share, Utc::now());
        row.weight = Some(dec!(2));
        store.put_fair_share(&row).unwrap();

        let usage = UsageFile {
            today: None,
            available_slots: ResourceSlot::new(),
            records: vec![make_record(1, today, dec!(86400))],
        };
        recalculate(&config, &store, &usage, "default", today, Utc::now()).unwrap();

        let stored = store.get_fair_share(&key).unwrap().unwrap();
        assert_eq!(stored.weight, Some(dec!(2)));
        assert!(stored.calculation.is_some());
    }

    #[test]
    fn usage_counts_toward_every_level() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let raw = bucket_usage(&[make_record(1, date, dec!(10)), make_record(2, date, dec!(5))]);
        assert_eq!(raw.domain["default"][&date].get("cpu"), dec!(15));
        assert_eq!(raw.project[&Uuid::from_u128(1000)][&date].get("cpu"), dec!(15));
        assert_eq!(raw.user.len(), 2);
    }
}
