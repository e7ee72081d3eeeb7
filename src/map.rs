//! Hash map keyed by a primitive `u64`.
//!
//! Separate chaining over a bucket array with a 0.7 load factor and doubling
//! rehash. Keys are never boxed or hashed through `Hasher`; the bucket comes
//! straight from a bit-spreading mix of the key.
//!
//! The one non-standard capability is [`CursorMut`], which can unlink the
//! entry it is positioned on and keep walking the rest of the table. The purge
//! sweep depends on it.

use std::fmt;

/// Initial bucket count of [`LongMap::new`].
pub const DEFAULT_CAPACITY: usize = 1024;

const LOAD_FACTOR: f32 = 0.7;

struct Entry<V> {
    key: u64,
    value: V,
    next: Chain<V>,
}

type Chain<V> = Option<Box<Entry<V>>>;

/// Supplemental hash that spreads high bits into the low bits used for
/// bucket selection.
#[inline]
fn spread(key: u64) -> u32 {
    let mut h = (key ^ (key >> 32)) as u32;
    h ^= (h >> 20) ^ (h >> 12);
    h ^ (h >> 7) ^ (h >> 4)
}

#[inline]
fn bucket_of(key: u64, buckets: usize) -> usize {
    (spread(key) & 0x7FFF_FFFF) as usize % buckets
}

fn nth<V>(chain: &Chain<V>, depth: usize) -> Option<&Entry<V>> {
    let mut cur = chain.as_deref();
    for _ in 0..depth {
        cur = cur?.next.as_deref();
    }
    cur
}

fn nth_mut<V>(chain: &mut Chain<V>, depth: usize) -> Option<&mut Entry<V>> {
    let mut cur = chain.as_deref_mut();
    for _ in 0..depth {
        cur = cur?.next.as_deref_mut();
    }
    cur
}

fn position<V>(chain: &Chain<V>, key: u64) -> Option<usize> {
    let mut cur = chain.as_deref();
    let mut depth = 0;
    while let Some(entry) = cur {
        if entry.key == key {
            return Some(depth);
        }
        cur = entry.next.as_deref();
        depth += 1;
    }
    None
}

/// Unlink the entry `depth` links into `chain`, splicing its successor into
/// its place.
fn unlink_at<V>(mut link: &mut Chain<V>, depth: usize) -> Option<Box<Entry<V>>> {
    for _ in 0..depth {
        link = &mut link.as_mut()?.next;
    }
    let mut entry = link.take()?;
    *link = entry.next.take();
    Some(entry)
}

/// Open-chained map from `u64` to `V`.
pub struct LongMap<V> {
    buckets: Vec<Chain<V>>,
    count: usize,
    threshold: usize,
    initial_capacity: usize,
}

impl<V> LongMap<V> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a map with `capacity` buckets. Zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut map = Self {
            buckets: Self::alloc_buckets(capacity.max(1)),
            count: 0,
            threshold: 0,
            initial_capacity: capacity.max(1),
        };
        map.compute_threshold();
        map
    }

    fn alloc_buckets(n: usize) -> Vec<Chain<V>> {
        let mut buckets = Vec::with_capacity(n);
        buckets.resize_with(n, || None);
        buckets
    }

    #[inline]
    fn compute_threshold(&mut self) {
        self.threshold = (self.buckets.len() as f32 * LOAD_FACTOR) as usize;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current number of buckets.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Approximate heap bytes held by buckets and entries.
    pub fn memory_usage(&self) -> usize {
        self.buckets.capacity() * std::mem::size_of::<Chain<V>>()
            + self.count * std::mem::size_of::<Entry<V>>()
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        let mut cur = self.buckets[bucket_of(key, self.buckets.len())].as_deref();
        while let Some(entry) = cur {
            if entry.key == key {
                return Some(&entry.value);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        let idx = bucket_of(key, self.buckets.len());
        let depth = position(&self.buckets[idx], key)?;
        nth_mut(&mut self.buckets[idx], depth).map(|e| &mut e.value)
    }

    #[inline]
    pub fn contains_key(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace. Returns the previous value for `key`.
    pub fn put(&mut self, key: u64, value: V) -> Option<V> {
        if let Some(existing) = self.get_mut(key) {
            return Some(std::mem::replace(existing, value));
        }

        self.count += 1;
        if self.count > self.threshold {
            self.rehash();
        }

        let idx = bucket_of(key, self.buckets.len());
        let next = self.buckets[idx].take();
        self.buckets[idx] = Some(Box::new(Entry { key, value, next }));
        None
    }

    pub fn remove(&mut self, key: u64) -> Option<V> {
        let idx = bucket_of(key, self.buckets.len());
        let depth = position(&self.buckets[idx], key)?;
        let entry = unlink_at(&mut self.buckets[idx], depth)?;
        self.count -= 1;
        Some(entry.value)
    }

    fn rehash(&mut self) {
        let len = self.buckets.len() << 1;
        let old = std::mem::replace(&mut self.buckets, Self::alloc_buckets(len));

        for mut chain in old {
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                let idx = bucket_of(entry.key, len);
                entry.next = self.buckets[idx].take();
                self.buckets[idx] = Some(entry);
            }
        }
        self.compute_threshold();
    }

    /// Remove everything.
    ///
    /// A table that grew past both [`DEFAULT_CAPACITY`] and its initial
    /// capacity is reallocated at the initial size, so a burst does not pin
    /// memory forever.
    pub fn clear(&mut self) {
        self.count = 0;
        let len = self.buckets.len();
        if len > DEFAULT_CAPACITY && len > self.initial_capacity {
            self.buckets = Self::alloc_buckets(self.initial_capacity);
        } else {
            self.buckets.iter_mut().for_each(|b| *b = None);
        }
        self.compute_threshold();
    }

    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            buckets: &self.buckets,
            bucket: 0,
            entry: None,
        }
    }

    /// Cursor over every entry that may remove the entry it is on.
    pub fn cursor_mut(&mut self) -> CursorMut<'_, V> {
        CursorMut {
            map: self,
            bucket: 0,
            depth: 0,
            state: CursorState::Fresh,
        }
    }

    /// Keep only the entries for which `keep` returns true. Returns the number
    /// removed.
    pub fn retain(&mut self, mut keep: impl FnMut(u64, &mut V) -> bool) -> usize {
        let mut removed = 0;
        let mut cursor = self.cursor_mut();
        while let Some((key, value)) = cursor.next() {
            if !keep(key, value) {
                cursor.remove();
                removed += 1;
            }
        }
        removed
    }
}

impl<V> Default for LongMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for LongMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, V> {
    buckets: &'a [Chain<V>],
    bucket: usize,
    entry: Option<&'a Entry<V>>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entry {
                self.entry = entry.next.as_deref();
                return Some((entry.key, &entry.value));
            }
            let chain = self.buckets.get(self.bucket)?;
            self.bucket += 1;
            self.entry = chain.as_deref();
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Not yet positioned.
    Fresh,
    /// On the entry at (bucket, depth).
    On,
    /// The entry at (bucket, depth) was removed; its successor now sits there.
    Removed,
    Done,
}

/// Walks a [`LongMap`] bucket by bucket, chain link by chain link.
///
/// Not an `Iterator`: each yielded value borrows the cursor, which is what
/// lets [`CursorMut::remove`] run between steps.
pub struct CursorMut<'a, V> {
    map: &'a mut LongMap<V>,
    bucket: usize,
    depth: usize,
    state: CursorState,
}

impl<'a, V> CursorMut<'a, V> {
    /// Advance to the next entry.
    pub fn next(&mut self) -> Option<(u64, &mut V)> {
        match self.state {
            CursorState::Done => return None,
            CursorState::Fresh => {
                self.bucket = 0;
                self.depth = 0;
            }
            CursorState::On => self.depth += 1,
            CursorState::Removed => {}
        }

        while self.bucket < self.map.buckets.len() {
            if nth(&self.map.buckets[self.bucket], self.depth).is_some() {
                self.state = CursorState::On;
                let entry = nth_mut(&mut self.map.buckets[self.bucket], self.depth)?;
                return Some((entry.key, &mut entry.value));
            }
            self.bucket += 1;
            self.depth = 0;
        }

        self.state = CursorState::Done;
        None
    }

    /// Remove the entry the cursor is on. The next call to
    /// [`next`](Self::next) continues with its successor.
    ///
    /// Returns `None` if the cursor is not on an entry, including right after
    /// a previous `remove`.
    pub fn remove(&mut self) -> Option<(u64, V)> {
        if self.state != CursorState::On {
            return None;
        }
        let entry = unlink_at(&mut self.map.buckets[self.bucket], self.depth)?;
        self.map.count -= 1;
        self.state = CursorState::Removed;
        Some((entry.key, entry.value))
    }
}
