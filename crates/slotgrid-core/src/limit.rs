//! Tri-state policy limits.
//!
//! Policies coming from storage encode "no limit" either as a missing value
//! or as a literal `0`. [`Limit`] folds both into [`Limit::Unlimited`] at the
//! boundary so that checks never have to special-case zero.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum Limit {
    #[default]
    Unlimited,
    Limited(u64),
}

impl Limit {
    pub fn limited(n: u64) -> Self {
        Self::from(Some(n))
    }

    pub fn value(&self) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::Limited(n) => Some(*n),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Whether a counter already at `current` leaves no room for one more.
    pub fn is_reached_by(&self, current: u64) -> bool {
        match self {
            Limit::Unlimited => false,
            Limit::Limited(n) => current >= *n,
        }
    }
}

impl From<Option<u64>> for Limit {
    fn from(raw: Option<u64>) -> Self {
        match raw {
            None | Some(0) => Limit::Unlimited,
            Some(n) => Limit::Limited(n),
        }
    }
}

impl From<Limit> for Option<u64> {
    fn from(limit: Limit) -> Self {
        limit.value()
    }
}
