//! The sliding-window update and the offline merge.
//!
//! Both are pure: they take the stored record (if any) and return the record
//! to write back. Storage and locking live in [`crate::engine`].

use smallvec::smallvec;

use crate::record::{Record, Slot, Slots};

/// Parameters of one window update.
#[derive(Debug, Clone, Copy)]
pub struct Update {
    /// Amount to add: 1 for a hit, a fixed-point value for money, 0 to only
    /// touch the window.
    pub val: i32,
    /// Window length in minutes. `0` uses `default_dur`; negative is a
    /// query-only touch that leaves the slot without an expiry.
    pub dur: i32,
    /// Current minute.
    pub now: u32,
    /// The store's default window length.
    pub default_dur: i32,
    /// History bound.
    pub max: usize,
}

impl Update {
    /// The expiry a slot opened by this update gets.
    pub fn expiry(&self) -> u32 {
        if self.dur < 0 {
            return 0;
        }
        let dur = if self.dur == 0 { self.default_dur } else { self.dur };
        self.now.wrapping_add(dur.max(0) as u32)
    }
}

/// Fold one event into a key's history.
///
/// - A hit in a bucket already held accumulates into it.
/// - A hit in a new bucket opens a slot at its expiry's position, keeping
///   older slots that are still live, up to `max`.
/// - Once only one slot is left the record collapses back to `Single`.
pub fn advance(current: Option<Record>, up: &Update) -> Record {
    let expiry = up.expiry();
    let fresh = Slot::new(expiry, up.val);
    let max = up.max.max(1);

    let Some(current) = current else {
        return Record::Single(fresh);
    };

    match current {
        Record::Single(mut orig) => {
            if orig.expiry == expiry {
                orig.amount = orig.amount.wrapping_add(up.val);
                Record::Single(orig)
            } else if max == 1 || up.now > orig.expiry {
                Record::Single(fresh)
            } else if expiry > orig.expiry {
                Record::Multi(smallvec![fresh, orig])
            } else {
                Record::Multi(smallvec![orig, fresh])
            }
        }
        Record::Multi(mut items) => {
            let Some(first) = items.first_mut() else {
                return Record::Single(fresh);
            };

            if first.expiry == expiry {
                first.amount = first.amount.wrapping_add(up.val);
                items.truncate(max);
                return match items.get(1) {
                    Some(second) if up.now <= second.expiry => collapse(items),
                    _ => Record::Single(items[0]),
                };
            }

            let live = items
                .iter()
                .position(|s| s.expiry == 0 || s.expiry < up.now)
                .unwrap_or(items.len());
            items.truncate(live);

            // Live slots are non-zero and descending; a zero expiry sorts last.
            match items.iter().position(|s| s.expiry <= expiry) {
                Some(i) if items[i].expiry == expiry => {
                    items[i].amount = items[i].amount.wrapping_add(up.val);
                }
                Some(i) => items.insert(i, fresh),
                None => items.push(fresh),
            }
            items.truncate(max);
            collapse(items)
        }
    }
}

fn collapse(items: Slots) -> Record {
    if items.len() == 1 {
        Record::Single(items[0])
    } else {
        Record::Multi(items)
    }
}

/// Merge two histories of the same key, e.g. from two replicas.
///
/// Slots are ordered by (expiry, amount); slots without an expiry and all but
/// the first slot of each expiry are dropped; the newest `max` survive.
/// Commutative, and idempotent once deduplicated.
///
/// Returns `None` when nothing survives.
pub fn merge(a: &Record, b: &Record, max: usize) -> Option<Record> {
    let mut all: Slots = a.slots().iter().chain(b.slots()).copied().collect();
    all.sort_unstable();

    let mut kept = Slots::new();
    let mut last = 0u32;
    for slot in all {
        if slot.expiry != 0 && slot.expiry != last {
            kept.push(slot);
        }
        last = slot.expiry;
    }

    kept.reverse();
    kept.truncate(max.max(1));
    Record::from_slots(kept)
}
