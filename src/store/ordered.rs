//! BTreeMap-backed [`Backend`].
//!
//! Keeps raw entries in key order in process memory. It is the reference
//! backend for [`BackendStore`](super::BackendStore) and a baseline for
//! comparing other backends against.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::Backend;
use crate::error::Result;

pub struct OrderedBackend {
    map: RwLock<BTreeMap<u64, Box<[u8]>>>,
}

impl OrderedBackend {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }

    /// Memory usage (approximate).
    pub fn memory_usage(&self) -> usize {
        let map = self.map.read();
        let value_bytes: usize = map.values().map(|v| v.len() + 16).sum();
        let btree_overhead = map.len() * (8 + 16);
        value_bytes + btree_overhead
    }
}

impl Default for OrderedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for OrderedBackend {
    fn get(&self, key: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(&key).map(|v| v.to_vec()))
    }

    fn put(&self, key: u64, value: &[u8]) -> Result<()> {
        self.map.write().insert(key, value.into());
        Ok(())
    }

    fn remove(&self, key: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.map.write().remove(&key).map(Vec::from))
    }

    fn scan(&self, f: &mut dyn FnMut(u64, &[u8]) -> bool) -> Result<()> {
        let map = self.map.read();
        for (&key, value) in map.iter() {
            if !f(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    /// `ordered|<entries>|<approx bytes>`
    fn stats(&self) -> String {
        format!("ordered|{}|{}", self.len(), self.memory_usage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_backend() {
        let b = OrderedBackend::new();

        b.put(3, b"ccc").unwrap();
        b.put(1, b"a").unwrap();
        b.put(2, b"bb").unwrap();

        assert_eq!(b.get(1).unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(b.get(4).unwrap(), None);
        assert_eq!(b.len(), 3);

        let mut keys = Vec::new();
        b.scan(&mut |k, _| {
            keys.push(k);
            true
        })
        .unwrap();
        assert_eq!(keys, vec![1, 2, 3]);

        let mut first = Vec::new();
        b.scan(&mut |k, _| {
            first.push(k);
            false
        })
        .unwrap();
        assert_eq!(first, vec![1]);

        assert_eq!(b.remove(1).unwrap(), Some(b"a".to_vec()));
        assert_eq!(b.remove(1).unwrap(), None);
        assert!(b.stats().starts_with("ordered|2|"));
    }
}
