//! Per-key window history.

use std::fmt;

use smallvec::SmallVec;

/// Expiries at or below this are legacy raw counters, not minute timestamps
/// (20,000,000 minutes is early 2008).
pub const REAL_TIMESTAMP_FLOOR: u32 = 20_000_000;

/// Default bound on the history kept per key.
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Scale of fixed-point monetary amounts.
pub const FIXED_SCALE: f64 = 100.0;

/// Convert a monetary value to its fixed-point amount.
#[inline]
pub fn to_fix(value: f64) -> i32 {
    (value * FIXED_SCALE).round() as i32
}

/// Convert a fixed-point sum back to a monetary value.
#[inline]
pub fn from_fix(amount: i64) -> f64 {
    amount as f64 / FIXED_SCALE
}

/// One window bucket: the minute it expires and what accumulated in it.
///
/// Ordering is by expiry, then amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Slot {
    /// Minutes since the Unix epoch. `0` means "no window".
    pub expiry: u32,
    /// Raw event count or fixed-point value.
    pub amount: i32,
}

impl Slot {
    #[inline]
    pub const fn new(expiry: u32, amount: i32) -> Self {
        Self { expiry, amount }
    }

    /// Still counting at minute `now`.
    #[inline]
    pub fn is_live(&self, now: u32) -> bool {
        self.expiry != 0 && self.expiry >= now
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.expiry, self.amount)
    }
}

/// History storage. Most keys hold only a handful of live windows.
pub type Slots = SmallVec<[Slot; 4]>;

/// Everything stored for one key.
///
/// `Multi` items are sorted by descending expiry, hold no repeated expiry and
/// never exceed the store's history bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Single(Slot),
    Multi(Slots),
}

impl Record {
    pub fn single(expiry: u32, amount: i32) -> Self {
        Record::Single(Slot::new(expiry, amount))
    }

    /// Build from slots, collapsing a one-slot list to `Single`.
    ///
    /// Returns `None` for an empty list.
    pub fn from_slots(slots: impl IntoIterator<Item = Slot>) -> Option<Self> {
        let slots: Slots = slots.into_iter().collect();
        match slots.len() {
            0 => None,
            1 => Some(Record::Single(slots[0])),
            _ => Some(Record::Multi(slots)),
        }
    }

    #[inline]
    pub fn slots(&self) -> &[Slot] {
        match self {
            Record::Single(slot) => std::slice::from_ref(slot),
            Record::Multi(items) => items,
        }
    }

    /// Number of window slots held.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    /// Expiry of the most recent slot.
    #[inline]
    pub fn latest_expiry(&self) -> Option<u32> {
        self.slots().first().map(|s| s.expiry)
    }

    /// Sum of every slot's amount.
    pub fn total(&self) -> i64 {
        self.slots().iter().map(|s| s.amount as i64).sum()
    }

    /// Number of distinct amounts, where each zero amount counts on its own.
    pub fn distinct_amounts(&self) -> usize {
        let mut amounts: SmallVec<[i32; 8]> = self.slots().iter().map(|s| s.amount).collect();
        amounts.sort_unstable();

        let mut distinct = 0;
        let mut last = 0;
        for a in amounts {
            if last == 0 || last != a {
                distinct += 1;
            }
            last = a;
        }
        distinct
    }

    /// Fully expired relative to `now`: the newest slot carries a real
    /// timestamp that has already passed.
    pub fn is_expired(&self, now: u32) -> bool {
        match self.latest_expiry() {
            Some(expiry) => expiry > REAL_TIMESTAMP_FLOOR && now > expiry,
            None => false,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, slot) in self.slots().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{slot}")?;
        }
        Ok(())
    }
}
