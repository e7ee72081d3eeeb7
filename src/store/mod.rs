//! Record storage.
//!
//! The engine only needs a keyed record table with a purge sweep. Two
//! implementations:
//!
//! - [`MemoryStore`]: encoded records in a [`LongMap`](crate::map::LongMap)
//!   under one `RwLock`.
//! - [`BackendStore`]: an adapter over any [`Backend`] that stores raw
//!   key -> bytes, e.g. an off-heap or on-disk table. [`OrderedBackend`] is the
//!   in-process reference backend.

mod backend;
mod memory;
mod ordered;

pub use backend::{Backend, BackendStore, PURGE_BATCH};
pub use memory::MemoryStore;
pub use ordered::OrderedBackend;

use crate::error::Result;
use crate::record::Record;

/// Keyed record table.
///
/// `set`, `remove` and `purge` are serialized per instance; `get` may run
/// concurrently with them. Callbacks passed to `for_each` must not write to the
/// same store.
pub trait Store: Send + Sync {
    /// Short backend name used in stats and logs.
    fn kind(&self) -> &'static str;

    fn get(&self, key: u64) -> Result<Option<Record>>;

    fn set(&self, key: u64, record: &Record) -> Result<()>;

    /// Remove a key, returning what it held.
    fn remove(&self, key: u64) -> Result<Option<Record>>;

    /// Visit every record. Entries that fail to decode are logged and skipped.
    fn for_each(&self, f: &mut dyn FnMut(u64, Record)) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record whose newest window carries a real timestamp before
    /// `now`. Returns how many were removed.
    fn purge(&self, now: u32) -> Result<usize>;

    /// Pipe-delimited statistics.
    fn stats(&self) -> String;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Decode a stored entry for iteration, logging entries that fail.
pub(crate) fn decode_logged(kind: &str, key: u64, bytes: &[u8]) -> Option<Record> {
    match crate::codec::decode(bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            log::error!("{kind}: skipping key {key}: {e}");
            None
        }
    }
}

/// Purge predicate over raw entries. Undecodable entries are kept.
pub(crate) fn is_expired_entry(bytes: &[u8], now: u32) -> bool {
    crate::codec::decode(bytes)
        .map(|record| record.is_expired(now))
        .unwrap_or(false)
}
