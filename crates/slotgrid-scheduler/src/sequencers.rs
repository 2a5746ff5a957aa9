//! Ordering of the workloads admitted in one cycle.
//!
//! A sequencer only reorders; the output always holds exactly the input
//! workloads. Every ordering here is a stable sort, so workloads that tie
//! keep their relative input order (LIFO reverses it on purpose).

use std::cmp::Reverse;

use tracing::debug;

use slotgrid_core::SequencerKind;
use slotgrid_state::UserProjectKey;

use crate::fair_share::FairShareRanking;
use crate::snapshot::SystemSnapshot;
use crate::workload::SessionWorkload;

pub trait WorkloadSequencer: Send + Sync {
    fn name(&self) -> &'static str;

    fn sequence(
        &self,
        snapshot: &SystemSnapshot,
        workloads: Vec<SessionWorkload>,
    ) -> Vec<SessionWorkload>;
}

/// Highest priority first, then arrival order.
pub struct FifoSequencer;

impl WorkloadSequencer for FifoSequencer {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn sequence(&self, _: &SystemSnapshot, mut workloads: Vec<SessionWorkload>) -> Vec<SessionWorkload> {
        workloads.sort_by_key(|w| Reverse(w.priority));
        workloads
    }
}

/// Highest priority first, then newest arrival first.
pub struct LifoSequencer;

impl WorkloadSequencer for LifoSequencer {
    fn name(&self) -> &'static str {
        "lifo"
    }

    fn sequence(&self, _: &SystemSnapshot, mut workloads: Vec<SessionWorkload>) -> Vec<SessionWorkload> {
        workloads.reverse();
        workloads.sort_by_key(|w| Reverse(w.priority));
        workloads
    }
}

/// Dominant Resource Fairness: keypairs holding the smallest share of
/// their most-used resource go first.
pub struct DrfSequencer;

impl WorkloadSequencer for DrfSequencer {
    fn name(&self) -> &'static str {
        "drf"
    }

    fn sequence(
        &self,
        snapshot: &SystemSnapshot,
        mut workloads: Vec<SessionWorkload>,
    ) -> Vec<SessionWorkload> {
        workloads.sort_by_cached_key(|w| snapshot.dominant_share(&w.access_key));
        workloads
    }
}

/// Orders by fair-share rank. Users without a rank have no usage history
/// and go first.
pub struct FairShareSequencer {
    ranking: FairShareRanking,
}

impl FairShareSequencer {
    pub fn new(ranking: FairShareRanking) -> Self {
        Self { ranking }
    }
}

impl WorkloadSequencer for FairShareSequencer {
    fn name(&self) -> &'static str {
        "fair-share"
    }

    fn sequence(&self, _: &SystemSnapshot, mut workloads: Vec<SessionWorkload>) -> Vec<SessionWorkload> {
        workloads.sort_by_cached_key(|w| {
            let key = UserProjectKey {
                user_uuid: w.user_uuid,
                project_id: w.group_id,
            };
            self.ranking.rank_of(&key).unwrap_or(0)
        });
        workloads
    }
}

pub fn sequencer_for(
    kind: SequencerKind,
    ranking: Option<FairShareRanking>,
) -> Box<dyn WorkloadSequencer> {
    let sequencer: Box<dyn WorkloadSequencer> = match kind {
        SequencerKind::Fifo => Box::new(FifoSequencer),
        SequencerKind::Lifo => Box::new(LifoSequencer),
        SequencerKind::Drf => Box::new(DrfSequencer),
        SequencerKind::FairShare => Box::new(FairShareSequencer::new(ranking.unwrap_or_default())),
    };
    debug!(sequencer = sequencer.name(), "sequencer selected");
    sequencer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fair_share::UserSchedulingRank;
    use crate::snapshot::KeypairOccupancy;
    use crate::validators::testing::make_workload;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use slotgrid_core::ResourceSlot;
    use uuid::Uuid;

    fn keys(workloads: &[SessionWorkload]) -> Vec<&str> {
        workloads.iter().map(|w| w.access_key.as_str()).collect()
    }

    fn occupy(snapshot: &mut SystemSnapshot, key: &str, cpu: Decimal, mem: Decimal) {
        snapshot.resource_occupancy.by_keypair.insert(
            key.to_string(),
            KeypairOccupancy {
                occupied_slots: ResourceSlot::from([("cpu", cpu), ("mem", mem)]),
                ..Default::default()
            },
        );
    }

    #[test]
    fn drf_orders_by_dominant_share() {
        let mut snapshot = SystemSnapshot {
            total_capacity: ResourceSlot::from([("cpu", dec!(100)), ("mem", dec!(100))]),
            ..Default::default()
        };
        occupy(&mut snapshot, "user1", dec!(20), dec!(10));
        occupy(&mut snapshot, "user2", dec!(10), dec!(30));
        occupy(&mut snapshot, "user3", dec!(5), dec!(5));

        let workloads = vec![
            make_workload("user1", dec!(1)),
            make_workload("user2", dec!(1)),
            make_workload("user3", dec!(1)),
        ];
        let ordered = DrfSequencer.sequence(&snapshot, workloads);
        assert_eq!(keys(&ordered), vec!["user3", "user1", "user2"]);
    }

    #[test]
    fn drf_keeps_order_of_equal_shares() {
        let snapshot = SystemSnapshot {
            total_capacity: ResourceSlot::from([("cpu", dec!(100))]),
            ..Default::default()
        };
        let workloads = vec![
            make_workload("c", dec!(1)),
            make_workload("a", dec!(1)),
            make_workload("b", dec!(1)),
        ];
        let ordered = DrfSequencer.sequence(&snapshot, workloads);
        assert_eq!(keys(&ordered), vec!["c", "a", "b"]);
    }

    #[test]
    fn drf_tolerates_zero_capacity() {
        let mut snapshot = SystemSnapshot {
            total_capacity: ResourceSlot::from([("cpu", dec!(0)), ("mem", dec!(100))]),
            ..Default::default()
        };
        occupy(&mut snapshot, "busy", dec!(50), dec!(40));
        occupy(&mut snapshot, "idle", dec!(50), dec!(10));
        let workloads = vec![make_workload("busy", dec!(1)), make_workload("idle", dec!(1))];
        let ordered = DrfSequencer.sequence(&snapshot, workloads);
        assert_eq!(keys(&ordered), vec!["idle", "busy"]);
    }

    #[test]
    fn drf_tolerates_near_zero_capacity() {
        let mut snapshot = SystemSnapshot {
            total_capacity: ResourceSlot::from([("cpu", dec!(0.0000000001)), ("mem", dec!(100))]),
            ..Default::default()
        };
        occupy(&mut snapshot, "a", dec!(100000000000000000000), dec!(0));
        occupy(&mut snapshot, "b", dec!(0), dec!(50));
        let workloads = vec![
            make_workload("a", dec!(1)),
            make_workload("b", dec!(1)),
            make_workload("c", dec!(1)),
        ];
        assert_eq!(snapshot.dominant_share("a"), Decimal::MAX);
        let ordered = DrfSequencer.sequence(&snapshot, workloads);
        assert_eq!(keys(&ordered), vec!["c", "b", "a"]);
    }

    #[test]
    fn fifo_and_lifo_respect_priority() {
        let mut workloads = vec![
            make_workload("a", dec!(1)),
            make_workload("b", dec!(1)),
            make_workload("c", dec!(1)),
        ];
        workloads[2].priority = 10;
        let snapshot = SystemSnapshot::default();

        let fifo = FifoSequencer.sequence(&snapshot, workloads.clone());
        assert_eq!(keys(&fifo), vec!["c", "a", "b"]);

        let lifo = LifoSequencer.sequence(&snapshot, workloads);
        assert_eq!(keys(&lifo), vec!["c", "b", "a"]);
    }

    #[test]
    fn fair_share_puts_unranked_users_first() {
        let mut workloads = vec![
            make_workload("ranked2", dec!(1)),
            make_workload("ranked1", dec!(1)),
            make_workload("new", dec!(1)),
        ];
        for (i, w) in workloads.iter_mut().enumerate() {
            w.user_uuid = Uuid::from_u128(i as u128 + 1);
        }
        let project = workloads[0].group_id;
        let ranking = FairShareRanking::from(vec![
            UserSchedulingRank {
                user_uuid: Uuid::from_u128(1),
                project_id: project,
                rank: 2,
            },
            UserSchedulingRank {
                user_uuid: Uuid::from_u128(2),
                project_id: project,
                rank: 1,
            },
        ]);

        let sequencer = sequencer_for(SequencerKind::FairShare, Some(ranking));
        let ordered = sequencer.sequence(&SystemSnapshot::default(), workloads);
        assert_eq!(keys(&ordered), vec!["new", "ranked1", "ranked2"]);
    }

    proptest! {
        #[test]
        fn drf_output_is_sorted_and_complete(
            occupied in proptest::collection::vec(0u32..=100, 1..12),
        ) {
            let mut snapshot = SystemSnapshot {
                total_capacity: ResourceSlot::from([("cpu", dec!(100)), ("mem", dec!(100))]),
                ..Default::default()
            };
            let mut workloads = Vec::new();
            for (i, cpu) in occupied.iter().enumerate() {
                let key = format!("k{i}");
                occupy(&mut snapshot, &key, Decimal::from(*cpu), Decimal::ZERO);
                workloads.push(make_workload(&key, dec!(1)));
            }
            let input_ids: Vec<_> = workloads.iter().map(|w| w.session_id).collect();

            let ordered = DrfSequencer.sequence(&snapshot, workloads);
            prop_assert_eq!(ordered.len(), input_ids.len());

            for pair in ordered.windows(2) {
                let a = snapshot.dominant_share(&pair[0].access_key);
                let b = snapshot.dominant_share(&pair[1].access_key);
                prop_assert!(a <= b);
                if a == b {
                    let pos_a = input_ids.iter().position(|id| *id == pair[0].session_id);
                    let pos_b = input_ids.iter().position(|id| *id == pair[1].session_id);
                    prop_assert!(pos_a < pos_b);
                }
            }
        }
    }
}
