use parking_lot::Mutex;

use super::{decode_logged, is_expired_entry, Store};
use crate::codec;
use crate::error::Result;
use crate::record::Record;

/// Expired keys collected per scan before they are deleted.
pub const PURGE_BATCH: usize = 100_000;

/// Raw key -> bytes table that a [`BackendStore`] adapts.
///
/// Implementations handle their own interior locking. Removal during `scan` is
/// not required to be supported.
pub trait Backend: Send + Sync {
    fn get(&self, key: u64) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: u64, value: &[u8]) -> Result<()>;

    fn remove(&self, key: u64) -> Result<Option<Vec<u8>>>;

    /// Visit entries until `f` returns `false`.
    fn scan(&self, f: &mut dyn FnMut(u64, &[u8]) -> bool) -> Result<()>;

    fn len(&self) -> usize;

    fn stats(&self) -> String;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// [`Store`] over a [`Backend`].
///
/// Backends cannot remove while iterating, so purge collects expired keys in
/// batches and deletes each batch after its scan.
pub struct BackendStore<B> {
    backend: B,
    writes: Mutex<()>,
    batch: usize,
}

impl<B: Backend> BackendStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            writes: Mutex::new(()),
            batch: PURGE_BATCH,
        }
    }

    /// Override the purge batch size (at least 1).
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> Store for BackendStore<B> {
    fn kind(&self) -> &'static str {
        "backend"
    }

    fn get(&self, key: u64) -> Result<Option<Record>> {
        match self.backend.get(key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: u64, record: &Record) -> Result<()> {
        let bytes = codec::encode(record);
        let _guard = self.writes.lock();
        self.backend.put(key, &bytes)
    }

    fn remove(&self, key: u64) -> Result<Option<Record>> {
        let removed = {
            let _guard = self.writes.lock();
            self.backend.remove(key)?
        };
        match removed {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(u64, Record)) -> Result<()> {
        let kind = self.kind();
        self.backend.scan(&mut |key, bytes| {
            if let Some(record) = decode_logged(kind, key, bytes) {
                f(key, record);
            }
            true
        })
    }

    fn len(&self) -> usize {
        self.backend.len()
    }

    fn purge(&self, now: u32) -> Result<usize> {
        let _guard = self.writes.lock();
        let mut removed = 0;
        let mut keys = Vec::with_capacity(self.batch.min(1024));

        loop {
            keys.clear();
            self.backend.scan(&mut |key, bytes| {
                if is_expired_entry(bytes, now) {
                    keys.push(key);
                }
                keys.len() < self.batch
            })?;

            for &key in &keys {
                if self.backend.remove(key)?.is_some() {
                    removed += 1;
                }
            }

            if keys.len() < self.batch {
                return Ok(removed);
            }
        }
    }

    fn stats(&self) -> String {
        self.backend.stats()
    }

    fn close(&self) -> Result<()> {
        let _guard = self.writes.lock();
        self.backend.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{testing, OrderedBackend};

    #[test]
    fn test_basic() {
        testing::check_basic(&BackendStore::new(OrderedBackend::new()));
    }

    #[test]
    fn test_purge() {
        testing::check_purge(&BackendStore::new(OrderedBackend::new()));
    }

    #[test]
    fn test_purge_in_small_batches() {
        // 30 expired keys, 7 per batch: five scans.
        testing::check_purge(&BackendStore::new(OrderedBackend::new()).with_batch(7));
        testing::check_purge(&BackendStore::new(OrderedBackend::new()).with_batch(1));
        testing::check_purge(&BackendStore::new(OrderedBackend::new()).with_batch(30));
    }

    #[test]
    fn test_corrupt_entry_skipped() {
        let store = BackendStore::new(OrderedBackend::new());
        store.backend().put(5, &[0u8; 5]).unwrap();
        store.set(6, &Record::single(testing::T, 2)).unwrap();

        assert!(store.get(5).is_err());
        let mut seen = Vec::new();
        store.for_each(&mut |k, r| seen.push((k, r))).unwrap();
        assert_eq!(seen, vec![(6, Record::single(testing::T, 2))]);

        assert_eq!(store.purge(testing::T + 1).unwrap(), 1);
        assert_eq!(store.len(), 1);
        store.close().unwrap();
    }
}
