//! slotgrid-scheduler: admission, ordering and placement of pending sessions.
//!
//! Consumes a [`SystemSnapshot`] plus the pending workloads of one resource
//! group and produces allocations. The scheduler:
//!
//! - Validates workloads against quotas, concurrency and dependencies
//! - Orders workloads with FIFO, LIFO, DRF or fair-share sequencing
//! - Computes fair-share factors with time-decayed usage
//! - Places kernels through `slotgrid-placement`
//! - Merges repeated attempts into the scheduling history
//!
//! # Architecture
//!
//! ```text
//! Provisioner
//!   ├── SchedulingValidator (ordered ValidatorRules)
//!   ├── WorkloadSequencer (per resource group)
//!   ├── AgentSelector + ClusterConfigurationRule (slotgrid-placement)
//!   ├── SchedulingHistoryRecorder
//!   │     └── HistoryStore (StateStore or in-memory)
//!   └── Per-group RoundRobinCursor (lock-free index)
//!
//! FairShareFactorCalculator
//!   └── decayed usage → factors → FairShareRanking → FairShareSequencer
//! ```

pub mod allocation;
pub mod cursor;
pub mod error;
pub mod fair_share;
pub mod history;
pub mod provisioner;
pub mod recorder;
pub mod sequencers;
pub mod snapshot;
pub mod validators;
pub mod workload;

pub use allocation::{KernelAllocation, ScheduleResult, SchedulingFailure, SessionAllocation};
pub use cursor::RoundRobinCursor;
pub use error::{RejectionError, SchedulerError, SchedulerResult};
pub use fair_share::{
    FairShareFactorCalculationResult, FairShareFactorCalculator, FairShareRanking,
    UserSchedulingRank,
};
pub use history::{
    HistoryAttempt, HistoryStore, InMemoryHistoryStore, SchedulingHistoryRecorder,
};
pub use provisioner::{Provisioner, SchedulingCycle};
pub use recorder::{ExecutionRecord, Phase};
pub use sequencers::{WorkloadSequencer, sequencer_for};
pub use snapshot::SystemSnapshot;
pub use validators::{SchedulingValidator, ValidatorRule};
pub use workload::{KernelWorkload, SessionWorkload};
