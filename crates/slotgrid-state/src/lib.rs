//! slotgrid-state: embedded state store for slotgrid.
//!
//! Backed by [redb](https://docs.rs/redb), persists the scheduling history
//! of sessions, kernels, deployments and routes, and the per-resource-group
//! fair-share records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! History rows are keyed `{scope_id}:{entry_id}` with time-ordered entry
//! ids, so a prefix range scan yields one scope's timeline. Fair-share rows
//! use the unique keys `{rg}/{domain}`, `{rg}/{project_id}` and
//! `{rg}/{user_uuid}:{project_id}`.
//!
//! Read-modify-write operations run inside a single redb write transaction.
//! redb admits one writer at a time, which makes each such operation atomic
//! with respect to concurrent callers. Transient transaction failures are
//! retried according to the store's [`RetryPolicy`](slotgrid_core::config::RetryPolicy).
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads and async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
