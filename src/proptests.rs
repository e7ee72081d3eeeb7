use super::*;

use crate::record::REAL_TIMESTAMP_FLOOR;
use crate::window::{advance, merge, Update};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Put(u64, u32),
    Remove(u64),
    Get(u64),
    /// Cursor sweep dropping values divisible by the argument.
    Sweep(u32),
    Clear,
}

fn key_strategy() -> impl Strategy<Value = u64> + Clone {
    // A narrow band forces chain collisions; the rest lands anywhere.
    prop_oneof![
        3 => 0u64..64,
        1 => any::<u64>(),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        50 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        25 => key.clone().prop_map(Op::Remove),
        20 => key.clone().prop_map(Op::Get),
        4 => (2u32..5).prop_map(Op::Sweep),
        1 => Just(Op::Clear),
    ];
    prop::collection::vec(op, 0..=1000)
}

fn slot_strategy() -> impl Strategy<Value = Slot> {
    // Few distinct expiries so merges see duplicates and zeros.
    (0u32..40, -5i32..5).prop_map(|(e, a)| Slot::new(e, a))
}

fn record_strategy() -> impl Strategy<Value = Record> {
    prop::collection::vec(slot_strategy(), 1..=12)
        .prop_map(|slots| Record::from_slots(slots).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_long_map_equivalence(ops in ops_strategy()) {
        let mut m: LongMap<u32> = LongMap::with_capacity(4);
        let mut oracle: BTreeMap<u64, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Put(key, value) => {
                    prop_assert_eq!(m.put(key, value), oracle.insert(key, value));
                }
                Op::Remove(key) => {
                    prop_assert_eq!(m.remove(key), oracle.remove(&key));
                }
                Op::Get(key) => {
                    prop_assert_eq!(m.get(key).copied(), oracle.get(&key).copied());
                }
                Op::Sweep(n) => {
                    let before = oracle.len();
                    oracle.retain(|_, v| *v % n != 0);
                    prop_assert_eq!(m.retain(|_, v| *v % n != 0), before - oracle.len());
                }
                Op::Clear => {
                    m.clear();
                    oracle.clear();
                }
            }

            prop_assert_eq!(m.len(), oracle.len());
        }

        let mut got: Vec<(u64, u32)> = m.iter().map(|(k, v)| (k, *v)).collect();
        got.sort_unstable();
        let expected: Vec<(u64, u32)> = oracle.into_iter().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_codec_round_trip(slots in prop::collection::vec(any::<Slot>(), 1..=16)) {
        let record = Record::from_slots(slots).unwrap();
        let bytes = codec::encode(&record);
        prop_assert_eq!(bytes.len(), record.len() * codec::SLOT_BYTES);
        prop_assert_eq!(codec::decode(&bytes), Ok(record));
    }

    #[test]
    fn prop_decode_total(bytes in prop::collection::vec(any::<u8>(), 0..80)) {
        match codec::decode(&bytes) {
            Ok(record) if bytes.len() != 4 => prop_assert_eq!(codec::encode(&record), bytes),
            Ok(record) => prop_assert_eq!(record.len(), 1),
            Err(CodecError::InvalidLength(n)) => prop_assert_eq!(n, bytes.len()),
        }
    }

    #[test]
    fn prop_merge_commutative(a in record_strategy(), b in record_strategy(), max in 1usize..12) {
        prop_assert_eq!(merge(&a, &b, max), merge(&b, &a, max));
    }

    #[test]
    fn prop_merge_idempotent(a in record_strategy(), b in record_strategy(), max in 1usize..12) {
        if let Some(m) = merge(&a, &b, max) {
            prop_assert!(m.len() <= max);
            prop_assert!(m.slots().iter().all(|s| s.expiry != 0));
            prop_assert!(m.slots().windows(2).all(|w| w[0].expiry > w[1].expiry));

            prop_assert_eq!(merge(&m, &m, max), Some(m.clone()));
            prop_assert_eq!(merge(&m, &b, max), Some(m.clone()));
            prop_assert_eq!(merge(&a, &m, max), Some(m));
        }
    }

    #[test]
    fn prop_advance_keeps_history_ordered(
        steps in prop::collection::vec((0u32..5, -3i32..10, 0i32..30), 1..200),
        max in 1usize..12,
    ) {
        let mut now = 25_000_000u32;
        let mut current: Option<Record> = None;

        for (gap, val, dur) in steps {
            now += gap;
            let up = Update { val, dur, now, default_dur: 60, max };
            let expiry = up.expiry();
            let next = advance(current.take(), &up);

            let slots = next.slots();
            prop_assert!(slots.len() <= max);
            prop_assert!(
                slots.windows(2).all(|w| w[0].expiry > w[1].expiry),
                "unordered or repeated expiry in {}",
                next
            );
            if slots.len() < max {
                prop_assert!(slots.iter().any(|s| s.expiry == expiry));
            }
            if let Record::Multi(items) = &next {
                prop_assert!(items.len() >= 2);
            }

            current = Some(next);
        }
    }

    #[test]
    fn prop_purge_removes_exactly_expired(
        entries in prop::collection::btree_map(
            any::<u64>(),
            prop_oneof![0u32..1000, 19_999_000u32..20_002_000],
            0..300,
        ),
        now in 19_999_500u32..20_002_500,
    ) {
        let stores: [Box<dyn Store>; 2] = [
            Box::new(MemoryStore::with_capacity(8)),
            Box::new(BackendStore::new(OrderedBackend::new()).with_batch(16)),
        ];

        let expired: Vec<u64> = entries
            .iter()
            .filter(|(_, e)| **e > REAL_TIMESTAMP_FLOOR && now > **e)
            .map(|(k, _)| *k)
            .collect();

        for store in stores {
            for (&key, &expiry) in &entries {
                store.set(key, &Record::single(expiry, 1)).unwrap();
            }

            prop_assert_eq!(store.purge(now).unwrap(), expired.len());
            prop_assert_eq!(store.len(), entries.len() - expired.len());
            for key in &expired {
                prop_assert!(store.get(*key).unwrap().is_none());
            }
        }
    }
}

#[test]
fn exhaustive_small_chain_removal_orders() {
    // Keys whose 32-bit halves cancel all share bucket 0, so this removes
    // every subset of one four-entry chain through the cursor.
    let keys = [1u64, 2, 3, 4].map(|x| (x << 32) | x);
    for mask in 0u32..16 {
        let mut m: LongMap<u64> = LongMap::with_capacity(1024);
        for &k in &keys {
            m.put(k, k);
        }

        let removed = m.retain(|k, _| {
            let i = keys.iter().position(|&x| x == k).unwrap();
            mask & (1 << i) == 0
        });
        assert_eq!(removed, mask.count_ones() as usize);

        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(m.get(k).is_some(), mask & (1 << i) == 0, "mask {mask:04b} key {k}");
        }
    }
}
