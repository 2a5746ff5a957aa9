//! Sparse resource-slot arithmetic.
//!
//! A [`ResourceSlot`] maps resource-type names (`cpu`, `mem`, `cuda.device`,
//! ...) to exact decimal quantities. Lookups of unknown keys yield zero and
//! arithmetic treats keys missing on either side as zero, so two slots with
//! different key sets can always be combined.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Resource-type name → quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceSlot(BTreeMap<String, Decimal>);

impl ResourceSlot {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Quantity for `key`, zero when absent.
    pub fn get(&self, key: &str) -> Decimal {
        self.0.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    /// Quantity for `key` only when the key is present.
    pub fn get_explicit(&self, key: &str) -> Option<Decimal> {
        self.0.get(key).copied()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Decimal) {
        self.0.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every quantity is zero (an empty slot is zero).
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| v.is_zero())
    }

    /// Multiply every quantity by `factor`, saturating at the decimal range.
    pub fn scale(&self, factor: Decimal) -> Self {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.saturating_mul(factor)))
            .collect()
    }

    /// Key-wise sum, or `None` if any quantity leaves the decimal range.
    pub fn checked_add(&self, rhs: &ResourceSlot) -> Option<ResourceSlot> {
        let mut out = self.clone();
        for (k, v) in &rhs.0 {
            let slot = out.0.entry(k.clone()).or_insert(Decimal::ZERO);
            *slot = slot.checked_add(*v)?;
        }
        Some(out)
    }

    /// Key-wise sum clamped to `Decimal::MIN..=Decimal::MAX`.
    pub fn saturating_add(&self, rhs: &ResourceSlot) -> ResourceSlot {
        let mut out = self.clone();
        out.saturating_add_assign(rhs);
        out
    }

    pub fn saturating_add_assign(&mut self, rhs: &ResourceSlot) {
        for (k, v) in &rhs.0 {
            let slot = self.0.entry(k.clone()).or_insert(Decimal::ZERO);
            *slot = slot.saturating_add(*v);
        }
    }

    /// Whether this request fits into `available`.
    ///
    /// Keys missing from `available` count as zero capacity.
    pub fn fits_within_available(&self, available: &ResourceSlot) -> bool {
        self.0.iter().all(|(k, v)| *v <= available.get(k))
    }

    /// Whether this amount stays within a policy `limit`.
    ///
    /// Keys missing from `limit` are unlimited.
    pub fn fits_within_limit(&self, limit: &ResourceSlot) -> bool {
        self.0
            .iter()
            .all(|(k, v)| limit.get_explicit(k).is_none_or(|max| *v <= max))
    }

    /// Keys whose requested quantity exceeds what `available` offers.
    pub fn exceeding_keys<'a>(&'a self, available: &ResourceSlot) -> Vec<&'a str> {
        self.0
            .iter()
            .filter(|(k, v)| **v > available.get(k))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Human-readable rendering restricted to `known_slot_types`.
    ///
    /// An empty `known_slot_types` set renders every key. Memory is shown
    /// with binary units.
    pub fn humanize(&self, known_slot_types: &BTreeSet<String>) -> String {
        self.0
            .iter()
            .filter(|(k, _)| known_slot_types.is_empty() || known_slot_types.contains(*k))
            .map(|(k, v)| {
                if k == "mem" {
                    format!("{k}={}", format_binary_size(*v))
                } else {
                    format!("{k}={}", v.normalize())
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Render a byte count with the largest binary unit that keeps it >= 1.
pub fn format_binary_size(bytes: Decimal) -> String {
    const UNITS: [&str; 6] = ["bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let step = Decimal::from(1024);
    let mut value = bytes;
    let mut unit = 0;
    while value >= step && unit < UNITS.len() - 1 {
        value /= step;
        unit += 1;
    }
    format!("{} {}", value.round_dp(2).normalize(), UNITS[unit])
}

impl fmt::Display for ResourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.humanize(&BTreeSet::new()))
    }
}

impl<K: Into<String>> FromIterator<(K, Decimal)> for ResourceSlot {
    fn from_iter<I: IntoIterator<Item = (K, Decimal)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<K: Into<String>, const N: usize> From<[(K, Decimal); N]> for ResourceSlot {
    fn from(pairs: [(K, Decimal); N]) -> Self {
        pairs.into_iter().collect()
    }
}

// The operators below use `Decimal`'s own operators and panic when a
// quantity overflows. Accounting over untrusted totals goes through
// `saturating_add` instead.

impl Add<&ResourceSlot> for &ResourceSlot {
    type Output = ResourceSlot;

    fn add(self, rhs: &ResourceSlot) -> ResourceSlot {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Add for ResourceSlot {
    type Output = ResourceSlot;

    fn add(mut self, rhs: ResourceSlot) -> ResourceSlot {
        self += &rhs;
        self
    }
}

impl AddAssign<&ResourceSlot> for ResourceSlot {
    fn add_assign(&mut self, rhs: &ResourceSlot) {
        for (k, v) in &rhs.0 {
            *self.0.entry(k.clone()).or_insert(Decimal::ZERO) += *v;
        }
    }
}

impl Sub<&ResourceSlot> for &ResourceSlot {
    type Output = ResourceSlot;

    fn sub(self, rhs: &ResourceSlot) -> ResourceSlot {
        let mut out = self.clone();
        for (k, v) in &rhs.0 {
            *out.0.entry(k.clone()).or_insert(Decimal::ZERO) -= *v;
        }
        out
    }
}

impl Sub for ResourceSlot {
    type Output = ResourceSlot;

    fn sub(self, rhs: ResourceSlot) -> ResourceSlot {
        &self - &rhs
    }
}

impl<'a> Sum<&'a ResourceSlot> for ResourceSlot {
    fn sum<I: Iterator<Item = &'a ResourceSlot>>(iter: I) -> Self {
        iter.fold(ResourceSlot::new(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}
