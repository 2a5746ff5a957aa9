//! Fair-share factors from time-decayed usage.
//!
//! Each domain, project and user gets a factor in `[0, 1]`:
//!
//! ```text
//! decayed_usage     = usage * 2^(-days_ago / half_life_days)
//! usage_score       = Σ usage[r] * w[r] / Σ w[r]
//! normalized_usage  = usage_score / usage_scale
//! fair_share_factor = 2^(-normalized_usage / weight)
//! ```
//!
//! A factor of 1.0 means no recent usage and therefore the highest
//! priority. Users are then ranked by their domain, project and own factor
//! and the ranks drive the fair-share sequencer.
//!
//! Everything here is pure computation. Loading usage buckets and storing
//! the resulting snapshots is up to the caller.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use slotgrid_core::config::FairShareConfig;
use slotgrid_core::{DomainName, ProjectId, ResourceSlot, UserId};
use slotgrid_state::{
    FairShareCalculationSnapshot, FairShareData, FairShareKey, FairShareRow, UserProjectKey,
};

/// Seconds in a day; default normalisation of resource-seconds.
pub const SECONDS_PER_DAY: Decimal = Decimal::from_parts(86400, 0, 0, false, 0);

const EXPONENT_BOUND: Decimal = Decimal::TEN;

/// Below `2^-96` every power of two rounds to zero at decimal precision.
const POW2_UNDERFLOW: Decimal = Decimal::from_parts(96, 0, 0, true, 0);

/// Weights used when neither the record nor the config supplies any.
pub fn default_resource_weights() -> ResourceSlot {
    ResourceSlot::from([
        ("cpu", Decimal::new(1, 0)),
        ("mem", Decimal::new(1, 3)),
        ("cuda.device", Decimal::new(10, 0)),
        ("cuda.shares", Decimal::new(10, 0)),
    ])
}

/// Per-level maps keyed by domain name, project id and user/project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMaps<V> {
    pub domain: BTreeMap<DomainName, V>,
    pub project: BTreeMap<ProjectId, V>,
    pub user: BTreeMap<UserProjectKey, V>,
}

impl<V> Default for LevelMaps<V> {
    fn default() -> Self {
        Self {
            domain: BTreeMap::new(),
            project: BTreeMap::new(),
            user: BTreeMap::new(),
        }
    }
}

/// Daily usage of one scope.
pub type UsageBuckets = BTreeMap<NaiveDate, ResourceSlot>;
pub type RawUsageBucketsByLevel = LevelMaps<UsageBuckets>;
pub type DecayedUsageByLevel = LevelMaps<ResourceSlot>;
pub type FairSharesByLevel = LevelMaps<FairShareData>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorResult {
    pub domain_name: String,
    pub total_decayed_usage: ResourceSlot,
    pub normalized_usage: Decimal,
    pub fair_share_factor: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSchedulingRank {
    pub user_uuid: UserId,
    pub project_id: ProjectId,
    /// 1 is the highest priority.
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FairShareFactorCalculationResult {
    pub domain_results: BTreeMap<DomainName, FactorResult>,
    pub project_results: BTreeMap<ProjectId, FactorResult>,
    pub user_results: BTreeMap<UserProjectKey, FactorResult>,
    pub scheduling_ranks: Vec<UserSchedulingRank>,
    pub lookback_start: NaiveDate,
    pub lookback_end: NaiveDate,
}

impl FairShareFactorCalculationResult {
    pub fn ranking(&self) -> FairShareRanking {
        FairShareRanking::from(self.scheduling_ranks.clone())
    }

    pub fn result_for(&self, key: &FairShareKey) -> Option<&FactorResult> {
        match key {
            FairShareKey::Domain { domain_name, .. } => self.domain_results.get(domain_name),
            FairShareKey::Project { project_id, .. } => self.project_results.get(project_id),
            FairShareKey::User { user, .. } => self.user_results.get(user),
        }
    }

    pub fn snapshot(&self, factor: &FactorResult, now: DateTime<Utc>) -> FairShareCalculationSnapshot {
        FairShareCalculationSnapshot {
            fair_share_factor: factor.fair_share_factor,
            total_decayed_usage: factor.total_decayed_usage.clone(),
            normalized_usage: factor.normalized_usage,
            lookback_start: self.lookback_start,
            lookback_end: self.lookback_end,
            last_calculated_at: now,
        }
    }

    /// Attach the new calculation to every row that has a result.
    ///
    /// Rows without usage in this window are returned unchanged.
    pub fn apply_to_rows(&self, rows: Vec<FairShareRow>, now: DateTime<Utc>) -> Vec<FairShareRow> {
        rows.into_iter()
            .map(|row| match self.result_for(&row.key) {
                Some(factor) => {
                    let snapshot = self.snapshot(factor, now);
                    row.with_calculation(snapshot, now)
                }
                None => row,
            })
            .collect()
    }
}

/// User/project → scheduling rank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<UserSchedulingRank>", into = "Vec<UserSchedulingRank>")]
pub struct FairShareRanking {
    ranks: BTreeMap<UserProjectKey, u32>,
}

impl FairShareRanking {
    pub fn rank_of(&self, key: &UserProjectKey) -> Option<u32> {
        self.ranks.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

impl From<Vec<UserSchedulingRank>> for FairShareRanking {
    fn from(ranks: Vec<UserSchedulingRank>) -> Self {
        Self {
            ranks: ranks
                .into_iter()
                .map(|r| {
                    let key = UserProjectKey {
                        user_uuid: r.user_uuid,
                        project_id: r.project_id,
                    };
                    (key, r.rank)
                })
                .collect(),
        }
    }
}

impl From<FairShareRanking> for Vec<UserSchedulingRank> {
    fn from(ranking: FairShareRanking) -> Self {
        let mut ranks: Vec<UserSchedulingRank> = ranking
            .ranks
            .into_iter()
            .map(|(key, rank)| UserSchedulingRank {
                user_uuid: key.user_uuid,
                project_id: key.project_id,
                rank,
            })
            .collect();
        ranks.sort_by_key(|r| r.rank);
        ranks
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FairShareFactorCalculator {
    resource_weights: ResourceSlot,
    usage_scale: Decimal,
    default_weight: Decimal,
}

impl Default for FairShareFactorCalculator {
    fn default() -> Self {
        Self {
            resource_weights: default_resource_weights(),
            usage_scale: SECONDS_PER_DAY,
            default_weight: Decimal::ONE,
        }
    }
}

impl FairShareFactorCalculator {
    pub fn from_config(config: &FairShareConfig) -> Self {
        Self {
            resource_weights: config
                .resource_weights
                .clone()
                .filter(|w| !w.is_empty())
                .unwrap_or_else(default_resource_weights),
            usage_scale: config.usage_scale,
            default_weight: config.default_weight,
        }
    }

    pub fn resource_weights(&self) -> &ResourceSlot {
        &self.resource_weights
    }

    /// Factors for every scope that has usage, plus user ranks.
    pub fn calculate_factors(
        &self,
        usages: &DecayedUsageByLevel,
        fair_shares: &FairSharesByLevel,
        lookback_start: NaiveDate,
        lookback_end: NaiveDate,
    ) -> FairShareFactorCalculationResult {
        let domain_results = usages
            .domain
            .iter()
            .map(|(name, usage)| {
                let record = fair_shares.domain.get(name);
                let mut result = self.factor_for(usage, record);
                result.domain_name = name.clone();
                (name.clone(), result)
            })
            .collect();
        let project_results = usages
            .project
            .iter()
            .map(|(id, usage)| (*id, self.factor_for(usage, fair_shares.project.get(id))))
            .collect();
        let user_results = usages
            .user
            .iter()
            .map(|(key, usage)| (*key, self.factor_for(usage, fair_shares.user.get(key))))
            .collect();

        let mut result = FairShareFactorCalculationResult {
            domain_results,
            project_results,
            user_results,
            scheduling_ranks: Vec::new(),
            lookback_start,
            lookback_end,
        };
        result.scheduling_ranks = scheduling_ranks(&result);
        debug!(
            domains = result.domain_results.len(),
            projects = result.project_results.len(),
            users = result.user_results.len(),
            %lookback_start,
            %lookback_end,
            "fair share factors calculated"
        );
        result
    }

    fn factor_for(&self, usage: &ResourceSlot, record: Option<&FairShareData>) -> FactorResult {
        let weight = record.map_or(self.default_weight, |r| r.spec.weight);
        let resource_weights = record
            .map(|r| &r.spec.resource_weights)
            .filter(|w| !w.is_empty())
            .unwrap_or(&self.resource_weights);
        let (normalized_usage, fair_share_factor) =
            self.calculate_factor(usage, weight, resource_weights);
        FactorResult {
            domain_name: record.map(|r| r.domain_name.clone()).unwrap_or_default(),
            total_decayed_usage: usage.clone(),
            normalized_usage,
            fair_share_factor,
        }
    }

    /// `(normalized_usage, fair_share_factor)` for one scope.
    pub fn calculate_factor(
        &self,
        usage: &ResourceSlot,
        weight: Decimal,
        resource_weights: &ResourceSlot,
    ) -> (Decimal, Decimal) {
        let scale = if self.usage_scale > Decimal::ZERO {
            self.usage_scale
        } else {
            SECONDS_PER_DAY
        };
        let normalized_usage = saturating_div(usage_score(usage, resource_weights), scale);
        (normalized_usage, fair_share_factor(normalized_usage, weight))
    }
}

/// Weighted average of per-resource usage.
///
/// Resource types without a weight count with weight 1.
pub fn usage_score(usage: &ResourceSlot, resource_weights: &ResourceSlot) -> Decimal {
    let mut total_score = Decimal::ZERO;
    let mut total_weight = Decimal::ZERO;
    for (slot_type, value) in usage.iter() {
        let weight = resource_weights.get_explicit(slot_type).unwrap_or(Decimal::ONE);
        total_score = total_score.saturating_add(value.saturating_mul(weight));
        total_weight = total_weight.saturating_add(weight);
    }
    if total_weight > Decimal::ZERO {
        saturating_div(total_score, total_weight)
    } else {
        Decimal::ZERO
    }
}

/// `numerator / denominator` for a positive denominator, clamped to the
/// decimal range on overflow.
fn saturating_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    numerator.checked_div(denominator).unwrap_or(if numerator.is_sign_negative() {
        Decimal::MIN
    } else {
        Decimal::MAX
    })
}

/// `2^(-normalized_usage / weight)` with the exponent bounded to ±10 and
/// the result to `[0, 1]`.
pub fn fair_share_factor(normalized_usage: Decimal, weight: Decimal) -> Decimal {
    let weight = if weight > Decimal::ZERO {
        weight
    } else {
        trace!(%weight, "non-positive fair share weight, using 1");
        Decimal::ONE
    };
    let exponent = saturating_div(-normalized_usage, weight).clamp(-EXPONENT_BOUND, EXPONENT_BOUND);
    pow2(exponent).clamp(Decimal::ZERO, Decimal::ONE)
}

fn pow2(exponent: Decimal) -> Decimal {
    if exponent.is_zero() {
        return Decimal::ONE;
    }
    if exponent < POW2_UNDERFLOW {
        return Decimal::ZERO;
    }
    Decimal::TWO.checked_powd(exponent).unwrap_or(if exponent.is_sign_negative() {
        Decimal::ZERO
    } else {
        Decimal::MAX
    })
}

/// Halve `usage` every `half_life_days` since `bucket_date`.
///
/// Buckets dated today or in the future are returned unchanged, as is
/// everything when `half_life_days` is zero.
pub fn apply_time_decay(
    usage: &ResourceSlot,
    bucket_date: NaiveDate,
    today: NaiveDate,
    half_life_days: u32,
) -> ResourceSlot {
    let days_ago = (today - bucket_date).num_days();
    if days_ago <= 0 || half_life_days == 0 {
        return usage.clone();
    }
    let exponent = Decimal::from(-days_ago) / Decimal::from(half_life_days);
    usage.scale(pow2(exponent))
}

/// Sum of decayed buckets dated within `[today - lookback_days, today]`.
pub fn aggregate_with_decay(
    buckets: &UsageBuckets,
    today: NaiveDate,
    half_life_days: u32,
    lookback_days: u32,
) -> ResourceSlot {
    let window_start = today
        .checked_sub_days(Days::new(u64::from(lookback_days)))
        .unwrap_or(NaiveDate::MIN);
    buckets
        .range(window_start..=today)
        .map(|(date, usage)| apply_time_decay(usage, *date, today, half_life_days))
        .fold(ResourceSlot::new(), |mut acc, decayed| {
            acc.saturating_add_assign(&decayed);
            acc
        })
}

/// [`aggregate_with_decay`] applied to every scope of every level.
pub fn aggregate_levels(
    raw: &RawUsageBucketsByLevel,
    today: NaiveDate,
    half_life_days: u32,
    lookback_days: u32,
) -> DecayedUsageByLevel {
    let aggregate = |buckets: &UsageBuckets| {
        aggregate_with_decay(buckets, today, half_life_days, lookback_days)
    };
    LevelMaps {
        domain: raw.domain.iter().map(|(k, b)| (k.clone(), aggregate(b))).collect(),
        project: raw.project.iter().map(|(k, b)| (*k, aggregate(b))).collect(),
        user: raw.user.iter().map(|(k, b)| (*k, aggregate(b))).collect(),
    }
}

/// Rank users by (domain, project, user) factor, highest first.
///
/// A user whose domain or project has no result counts that level as 1.0.
fn scheduling_ranks(result: &FairShareFactorCalculationResult) -> Vec<UserSchedulingRank> {
    let mut ordered: Vec<(Reverse<Decimal>, Reverse<Decimal>, Reverse<Decimal>, UserProjectKey)> =
        result
            .user_results
            .iter()
            .map(|(key, user)| {
                let domain_factor = result
                    .domain_results
                    .get(&user.domain_name)
                    .map_or(Decimal::ONE, |d| d.fair_share_factor);
                let project_factor = result
                    .project_results
                    .get(&key.project_id)
                    .map_or(Decimal::ONE, |p| p.fair_share_factor);
                (
                    Reverse(domain_factor),
                    Reverse(project_factor),
                    Reverse(user.fair_share_factor),
                    *key,
                )
            })
            .collect();
    ordered.sort();
    ordered
        .into_iter()
        .zip(1u32..)
        .map(|((_, _, _, key), rank)| UserSchedulingRank {
            user_uuid: key.user_uuid,
            project_id: key.project_id,
            rank,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use slotgrid_state::{FairShareKey, FairShareRow};
    use uuid::Uuid;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn close(a: Decimal, b: Decimal) -> bool {
        (a - b).abs() < dec!(0.000001)
    }

    fn user_key(user: u128, project: u128) -> UserProjectKey {
        UserProjectKey {
            user_uuid: Uuid::from_u128(user),
            project_id: Uuid::from_u128(project),
        }
    }

    fn make_user_data(key: UserProjectKey, domain: &str, weight: Decimal) -> FairShareData {
        let row_key = FairShareKey::User {
            resource_group: "default".into(),
            user: key,
        };
        let mut row = FairShareRow::new(row_key, domain, &FairShareConfig::default(), Utc::now());
        row.weight = Some(weight);
        row.to_data(Decimal::ONE, &ResourceSlot::new())
    }

    #[test]
    fn default_weights_table() {
        let weights = default_resource_weights();
        assert_eq!(weights.get("cpu"), dec!(1.0));
        assert_eq!(weights.get("mem"), dec!(0.001));
        assert_eq!(weights.get("cuda.device"), dec!(10));
        assert_eq!(weights.get("cuda.shares"), dec!(10));
        assert_eq!(SECONDS_PER_DAY, dec!(86400));
    }

    #[test]
    fn usage_score_is_weighted_average() {
        let usage = ResourceSlot::from([("cpu", dec!(100)), ("cuda.device", dec!(10))]);
        let weights = ResourceSlot::from([("cpu", dec!(1)), ("cuda.device", dec!(10))]);
        // (100 * 1 + 10 * 10) / 11
        assert_eq!(usage_score(&usage, &weights), dec!(200) / dec!(11));

        let unknown = ResourceSlot::from([("tpu", dec!(6))]);
        assert_eq!(usage_score(&unknown, &weights), dec!(6));

        let zero_weights = ResourceSlot::from([("cpu", dec!(0))]);
        let cpu_only = ResourceSlot::from([("cpu", dec!(5))]);
        assert_eq!(usage_score(&cpu_only, &zero_weights), Decimal::ZERO);
    }

    #[test]
    fn one_day_of_one_cpu_halves_the_factor() {
        let calc = FairShareFactorCalculator::default();
        let usage = ResourceSlot::from([("cpu", dec!(86400))]);
        let (normalized, factor) = calc.calculate_factor(&usage, Decimal::ONE, calc.resource_weights());
        assert_eq!(normalized, Decimal::ONE);
        assert!(close(factor, dec!(0.5)), "factor = {factor}");

        // Doubling the weight halves the penalty.
        let (_, factor) = calc.calculate_factor(&usage, dec!(2), calc.resource_weights());
        assert!(close(factor, dec!(0.7071067811865)), "factor = {factor}");
    }

    #[test]
    fn zero_usage_gives_full_factor() {
        assert_eq!(fair_share_factor(Decimal::ZERO, Decimal::ONE), Decimal::ONE);
        let calc = FairShareFactorCalculator::default();
        let (_, factor) = calc.calculate_factor(&ResourceSlot::new(), dec!(3), calc.resource_weights());
        assert_eq!(factor, Decimal::ONE);
    }

    #[test]
    fn exponent_is_clamped() {
        let floor = fair_share_factor(dec!(1000000), Decimal::ONE);
        assert!(close(floor, dec!(1) / dec!(1024)), "factor = {floor}");
        // A negative usage cannot lift the factor above 1.
        assert_eq!(fair_share_factor(dec!(-50), Decimal::ONE), Decimal::ONE);
    }

    #[test]
    fn tiny_weight_saturates_instead_of_overflowing() {
        let tiny = Decimal::new(1, 28);
        let floor = fair_share_factor(dec!(1000), tiny);
        assert!(close(floor, dec!(1) / dec!(1024)), "factor = {floor}");
        assert_eq!(fair_share_factor(dec!(-1000), tiny), Decimal::ONE);
        assert!(close(fair_share_factor(Decimal::MAX, Decimal::ONE), dec!(1) / dec!(1024)));
        assert_eq!(fair_share_factor(Decimal::MIN, Decimal::ONE), Decimal::ONE);
    }

    #[test]
    fn extreme_usage_scores_do_not_overflow() {
        let usage = ResourceSlot::from([("cpu", Decimal::MAX), ("cuda.device", Decimal::MAX)]);
        let weights = ResourceSlot::from([("cpu", dec!(10)), ("cuda.device", dec!(10))]);
        let score = usage_score(&usage, &weights);
        assert!(score > Decimal::ZERO);

        let calc = FairShareFactorCalculator::default();
        let (normalized, factor) = calc.calculate_factor(&usage, Decimal::new(1, 20), &weights);
        assert!(normalized > Decimal::ZERO);
        assert!(close(factor, dec!(1) / dec!(1024)), "factor = {factor}");
    }

    #[test]
    fn decay_is_identity_today_and_for_future_buckets() {
        let usage = ResourceSlot::from([("cpu", dec!(123.456))]);
        assert_eq!(apply_time_decay(&usage, day(10), day(10), 7), usage);
        assert_eq!(apply_time_decay(&usage, day(12), day(10), 7), usage);
    }

    #[test]
    fn decay_halves_per_half_life() {
        let usage = ResourceSlot::from([("cpu", dec!(100))]);
        let decayed = apply_time_decay(&usage, day(1), day(8), 7);
        assert!(close(decayed.get("cpu"), dec!(50)), "decayed = {decayed}");
        let decayed = apply_time_decay(&usage, day(1), day(15), 7);
        assert!(close(decayed.get("cpu"), dec!(25)), "decayed = {decayed}");
    }

    #[test]
    fn aggregation_skips_buckets_outside_the_window() {
        let today = day(29);
        let mut buckets = UsageBuckets::new();
        buckets.insert(day(29), ResourceSlot::from([("cpu", dec!(10))]));
        // Exactly at the window start: included, decayed by 2^-2.
        buckets.insert(day(15), ResourceSlot::from([("cpu", dec!(40))]));
        // One day before the window start: skipped.
        buckets.insert(day(14), ResourceSlot::from([("cpu", dec!(1000))]));

        let total = aggregate_with_decay(&buckets, today, 7, 14);
        assert!(close(total.get("cpu"), dec!(20)), "total = {total}");
    }

    #[test]
    fn unbounded_lookback_reaches_back_to_the_first_bucket() {
        let today = day(29);
        let mut buckets = UsageBuckets::new();
        buckets.insert(day(29), ResourceSlot::from([("cpu", dec!(10))]));
        buckets.insert(day(22), ResourceSlot::from([("cpu", dec!(40))]));
        buckets.insert(
            NaiveDate::from_ymd_opt(1900, 1, 1).unwrap(),
            ResourceSlot::from([("cpu", dec!(1000000))]),
        );

        let total = aggregate_with_decay(&buckets, today, 7, u32::MAX);
        assert!(close(total.get("cpu"), dec!(30)), "total = {total}");

        // Without decay the old bucket counts in full.
        let total = aggregate_with_decay(&buckets, today, 0, u32::MAX);
        assert_eq!(total.get("cpu"), dec!(1000050));
    }

    #[test]
    fn aggregate_levels_covers_every_scope() {
        let mut raw = RawUsageBucketsByLevel::default();
        let bucket: UsageBuckets = [(day(10), ResourceSlot::from([("cpu", dec!(5))]))].into();
        raw.domain.insert("default".into(), bucket.clone());
        raw.project.insert(Uuid::from_u128(1), bucket.clone());
        raw.user.insert(user_key(2, 1), bucket);

        let decayed = aggregate_levels(&raw, day(10), 7, 28);
        assert_eq!(decayed.domain["default"].get("cpu"), dec!(5));
        assert_eq!(decayed.project[&Uuid::from_u128(1)].get("cpu"), dec!(5));
        assert_eq!(decayed.user[&user_key(2, 1)].get("cpu"), dec!(5));
    }

    #[test]
    fn ranks_follow_domain_then_project_then_user() {
        let calc = FairShareFactorCalculator::default();
        let light = user_key(1, 10);
        let heavy = user_key(2, 10);
        let other_project = user_key(3, 20);

        let mut usages = DecayedUsageByLevel::default();
        usages.user.insert(light, ResourceSlot::from([("cpu", dec!(100))]));
        usages.user.insert(heavy, ResourceSlot::from([("cpu", dec!(500000))]));
        usages.user.insert(other_project, ResourceSlot::new());
        // Project 20 is busy overall, so its idle user still ranks last.
        usages.project.insert(Uuid::from_u128(10), ResourceSlot::from([("cpu", dec!(1000))]));
        usages.project.insert(Uuid::from_u128(20), ResourceSlot::from([("cpu", dec!(900000))]));

        let result = calc.calculate_factors(&usages, &FairSharesByLevel::default(), day(1), day(29));
        let order: Vec<_> = result
            .scheduling_ranks
            .iter()
            .map(|r| (r.user_uuid, r.rank))
            .collect();
        assert_eq!(
            order,
            vec![
                (light.user_uuid, 1),
                (heavy.user_uuid, 2),
                (other_project.user_uuid, 3),
            ]
        );

        let ranking = result.ranking();
        assert_eq!(ranking.rank_of(&light), Some(1));
        assert_eq!(ranking.rank_of(&user_key(9, 9)), None);
    }

    #[test]
    fn record_weight_and_domain_are_used() {
        let calc = FairShareFactorCalculator::default();
        let key = user_key(1, 10);
        let mut usages = DecayedUsageByLevel::default();
        usages.user.insert(key, ResourceSlot::from([("cpu", dec!(86400))]));
        let mut shares = FairSharesByLevel::default();
        shares.user.insert(key, make_user_data(key, "research", dec!(2)));

        let result = calc.calculate_factors(&usages, &shares, day(1), day(29));
        let user = &result.user_results[&key];
        assert_eq!(user.domain_name, "research");
        assert!(close(user.fair_share_factor, dec!(0.7071067811865)));
    }

    #[test]
    fn apply_to_rows_preserves_default_markers() {
        let calc = FairShareFactorCalculator::default();
        let key = user_key(1, 10);
        let row = FairShareRow::new(
            FairShareKey::User {
                resource_group: "default".into(),
                user: key,
            },
            "default",
            &FairShareConfig::default(),
            Utc::now(),
        );
        let mut usages = DecayedUsageByLevel::default();
        usages.user.insert(key, ResourceSlot::from([("cpu", dec!(86400))]));
        let result = calc.calculate_factors(&usages, &FairSharesByLevel::default(), day(1), day(29));

        let now = Utc::now();
        let updated = result.apply_to_rows(vec![row.clone()], now);
        let snapshot = updated[0].calculation.as_ref().unwrap();
        assert_eq!(snapshot.lookback_end, day(29));
        assert_eq!(updated[0].weight, None);
        assert_eq!(updated[0].resource_weights, row.resource_weights);
        assert_eq!(updated[0].updated_at, now);
    }

    #[test]
    fn ranking_serializes_as_list() {
        let ranking = FairShareRanking::from(vec![UserSchedulingRank {
            user_uuid: Uuid::from_u128(1),
            project_id: Uuid::from_u128(2),
            rank: 1,
        }]);
        let json = serde_json::to_string(&ranking).unwrap();
        let back: FairShareRanking = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ranking);
        assert!(json.starts_with('['));
    }

    proptest! {
        #[test]
        fn factor_stays_within_bounds(
            cpu in 0u64..10_000_000_000,
            mem in 0u64..1_000_000_000_000,
            weight_centis in 1u32..100_000,
        ) {
            let calc = FairShareFactorCalculator::default();
            let usage = ResourceSlot::from([
                ("cpu", Decimal::from(cpu)),
                ("mem", Decimal::from(mem)),
            ]);
            let weight = Decimal::new(i64::from(weight_centis), 2);
            let (_, factor) = calc.calculate_factor(&usage, weight, calc.resource_weights());
            prop_assert!(factor >= Decimal::ZERO);
            prop_assert!(factor <= Decimal::ONE);
            if cpu == 0 && mem == 0 {
                prop_assert_eq!(factor, Decimal::ONE);
            }
        }

        #[test]
        fn factor_stays_within_bounds_for_tiny_weights(
            cpu in 0u64..u64::MAX,
            scale in 0u32..=28,
        ) {
            let calc = FairShareFactorCalculator::default();
            let usage = ResourceSlot::from([("cpu", Decimal::from(cpu))]);
            let weight = Decimal::new(1, scale);
            let (_, factor) = calc.calculate_factor(&usage, weight, calc.resource_weights());
            prop_assert!(factor >= Decimal::ZERO);
            prop_assert!(factor <= Decimal::ONE);
        }
    }
}
