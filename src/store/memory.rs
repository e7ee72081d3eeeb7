use parking_lot::RwLock;

use super::{decode_logged, is_expired_entry, Store};
use crate::codec;
use crate::error::Result;
use crate::map::LongMap;
use crate::record::Record;

/// Heap store: encoded records in a [`LongMap`].
///
/// Records are kept in their 8-bytes-per-slot encoding rather than as
/// [`Record`] values, which keeps `Single` entries at 8 bytes of payload.
pub struct MemoryStore {
    map: RwLock<LongMap<Box<[u8]>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(crate::map::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: RwLock::new(LongMap::with_capacity(capacity)),
        }
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: u64) -> Result<Option<Record>> {
        let map = self.map.read();
        match map.get(key) {
            Some(bytes) => Ok(Some(codec::decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: u64, record: &Record) -> Result<()> {
        let bytes = codec::encode(record).into_boxed_slice();
        self.map.write().put(key, bytes);
        Ok(())
    }

    fn remove(&self, key: u64) -> Result<Option<Record>> {
        let removed = self.map.write().remove(key);
        match removed {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(u64, Record)) -> Result<()> {
        let map = self.map.read();
        for (key, bytes) in map.iter() {
            if let Some(record) = decode_logged(self.kind(), key, bytes) {
                f(key, record);
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn purge(&self, now: u32) -> Result<usize> {
        let mut map = self.map.write();
        Ok(map.retain(|_, bytes| !is_expired_entry(bytes, now)))
    }

    /// `memory|<records>|<buckets>|<approx bytes>`
    fn stats(&self) -> String {
        let map = self.map.read();
        format!(
            "{}|{}|{}|{}",
            self.kind(),
            map.len(),
            map.capacity(),
            map.memory_usage()
        )
    }
}
