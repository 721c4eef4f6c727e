use super::*;
use proptest::prelude::*;
use std::cmp::Ordering as CmpOrdering;

fn values(versions: &[VersionedValue]) -> Vec<(u64, ValueType, &[u8])> {
    versions
        .iter()
        .map(|v| (v.seq, v.vtype, v.value.as_ref()))
        .collect()
}

// -------------------- Basic CRUD --------------------

#[test]
fn put_and_get_single_key() {
    let m = Memtable::new();
    m.put(b"k1", b"v1", 1);
    assert_eq!(m.len(), 1);
    let got = m.get(b"k1", u64::MAX >> 8);
    assert_eq!(values(&got), vec![(1, ValueType::Value, &b"v1"[..])]);
}

#[test]
fn get_missing_key_returns_empty() {
    let m = Memtable::new();
    m.put(b"a", b"1", 1);
    m.put(b"c", b"3", 2);
    assert!(m.get(b"b", MAX_SEQUENCE).is_empty());
}

#[test]
fn versions_are_newest_first() {
    let m = Memtable::new();
    m.put(b"k", b"v1", 1);
    m.merge(b"k", b"m2", 2);
    m.merge(b"k", b"m3", 3);

    let got = m.get(b"k", MAX_SEQUENCE);
    assert_eq!(
        values(&got),
        vec![
            (3, ValueType::Merge, &b"m3"[..]),
            (2, ValueType::Merge, &b"m2"[..]),
            (1, ValueType::Value, &b"v1"[..]),
        ]
    );
}

#[test]
fn seq_bound_hides_newer_versions() {
    let m = Memtable::new();
    m.put(b"k", b"old", 5);
    m.put(b"k", b"new", 9);

    assert_eq!(m.get(b"k", 4).len(), 0);
    assert_eq!(m.get(b"k", 5)[0].value.as_ref(), b"old");
    assert_eq!(m.get(b"k", 8)[0].value.as_ref(), b"old");
    assert_eq!(m.get(b"k", 9)[0].value.as_ref(), b"new");
}

#[test]
fn delete_creates_tombstone_version() {
    let m = Memtable::new();
    m.put(b"k1", b"v1", 1);
    m.delete(b"k1", 2);
    let got = m.get(b"k1", MAX_SEQUENCE);
    assert_eq!(got[0].vtype, ValueType::Deletion);
    assert!(got[0].value.is_empty());
    assert_eq!(got[1].vtype, ValueType::Value);
    // tombstone is an entry of its own
    assert_eq!(m.len(), 2);
}

#[test]
fn neighbouring_keys_do_not_leak() {
    let m = Memtable::new();
    m.put(b"k", b"v", 1);
    m.put(b"k1", b"v1", 2);
    m.put(b"j", b"vj", 3);
    let got = m.get(b"k", MAX_SEQUENCE);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].value.as_ref(), b"v");
}

#[test]
#[should_panic(expected = "insert into frozen memtable")]
fn frozen_memtable_rejects_inserts() {
    let m = Memtable::new();
    m.put(b"a", b"1", 1);
    m.freeze();
    assert!(m.is_frozen());
    m.put(b"b", b"2", 2);
}

// -------------------- Sequence + size tracking --------------------

#[test]
fn tracks_first_and_last_seq() {
    let m = Memtable::new();
    assert_eq!(m.first_seq(), None);
    assert_eq!(m.last_seq(), 0);
    m.put(b"a", b"1", 10);
    m.put(b"b", b"2", 11);
    m.delete(b"c", 12);
    assert_eq!(m.first_seq(), Some(10));
    assert_eq!(m.last_seq(), 12);
}

#[test]
fn approximate_memory_grows_with_data() {
    let m = Memtable::new();
    assert_eq!(m.approximate_memory_usage(), 0);
    m.put(b"ab", b"ccc", 1);
    let one = m.approximate_memory_usage();
    assert!(one >= 5);
    m.put(b"big", &vec![b'x'; 1_000_000], 2);
    assert!(m.approximate_memory_usage() >= one + 1_000_003);
}

#[test]
fn key_range_reports_extremes() {
    let m = Memtable::new();
    assert!(m.key_range().is_none());
    m.put(b"m", b"1", 1);
    m.put(b"a", b"1", 2);
    m.put(b"z", b"1", 3);
    let (lo, hi) = m.key_range().unwrap();
    assert_eq!(lo.as_ref(), b"a");
    assert_eq!(hi.as_ref(), b"z");
}

// -------------------- Iterator ordering --------------------

#[test]
fn iter_yields_internal_order() {
    let m = Arc::new(Memtable::new());
    m.put(b"c", b"3", 3);
    m.put(b"a", b"1", 1);
    m.put(b"b", b"2", 2);
    m.put(b"a", b"1b", 4);

    let keys: Vec<(Vec<u8>, u64)> = m
        .iter()
        .map(|(k, _)| (k.user_key.to_vec(), k.seq))
        .collect();
    assert_eq!(
        keys,
        vec![
            (b"a".to_vec(), 4),
            (b"a".to_vec(), 1),
            (b"b".to_vec(), 2),
            (b"c".to_vec(), 3),
        ]
    );
}

#[test]
fn iter_seek_positions_at_first_visible() {
    let m = Arc::new(Memtable::new());
    for (i, k) in [b"a", b"b", b"c", b"d"].iter().enumerate() {
        m.put(*k, b"v", i as u64 + 1);
    }
    m.put(b"c", b"newer", 10);

    let mut it = m.iter();
    it.seek(&InternalKey::seek_key(b"c", 5));
    let (k, v) = it.next().unwrap();
    assert_eq!(k.user_key.as_ref(), b"c");
    assert_eq!(k.seq, 3);
    assert_eq!(v.as_ref(), b"v");
    assert_eq!(it.next().unwrap().0.user_key.as_ref(), b"d");
    assert!(it.next().is_none());

    it.seek_to_first();
    assert_eq!(it.next().unwrap().0.user_key.as_ref(), b"a");
}

#[test]
fn iter_empty_memtable() {
    let m = Arc::new(Memtable::new());
    assert_eq!(m.iter().count(), 0);
}

#[test]
fn iter_keeps_memtable_alive() {
    let m = Arc::new(Memtable::new());
    m.put(b"k", b"v", 1);
    let it = m.iter();
    drop(m);
    assert_eq!(it.count(), 1);
}

// -------------------- Concurrency --------------------

#[test]
fn readers_run_alongside_writer() -> anyhow::Result<()> {
    let m = Arc::new(Memtable::new());
    let writer = {
        let m = Arc::clone(&m);
        std::thread::spawn(move || {
            for i in 1..=5_000u64 {
                m.put(format!("key{:05}", i % 100).as_bytes(), &i.to_le_bytes(), i);
            }
        })
    };
    let reader = {
        let m = Arc::clone(&m);
        std::thread::spawn(move || {
            for _ in 0..200 {
                let mut prev: Option<InternalKey> = None;
                for (k, _) in m.iter() {
                    if let Some(p) = &prev {
                        assert!(p < &k);
                    }
                    prev = Some(k);
                }
            }
        })
    };
    writer.join().map_err(|_| anyhow::anyhow!("writer panicked"))?;
    reader.join().map_err(|_| anyhow::anyhow!("reader panicked"))?;
    assert_eq!(m.len(), 5_000);
    assert_eq!(m.get(b"key00000", MAX_SEQUENCE).len(), 50);
    Ok(())
}

// -------------------- Internal key encoding --------------------

#[test]
fn encoded_key_layout() {
    let k = InternalKey::new(&b"user"[..], 7, ValueType::Merge);
    let enc = k.encode();
    assert_eq!(enc.len(), 4 + TRAILER_LEN);
    assert_eq!(&enc[..4], b"user");
    assert_eq!(
        u64::from_le_bytes(enc[4..].try_into().unwrap()),
        (7 << 8) | 2
    );
    assert_eq!(InternalKey::decode(&enc), Some(k));
    assert_eq!(user_key_of(&enc), b"user");
}

#[test]
fn decode_rejects_short_and_unknown_type() {
    assert!(InternalKey::decode(b"short").is_none());
    let mut enc = b"k".to_vec();
    enc.extend_from_slice(&((1u64 << 8) | 9).to_le_bytes());
    assert!(InternalKey::decode(&enc).is_none());
}

#[test]
fn newer_sequence_sorts_first() {
    let a = InternalKey::new(&b"k"[..], 9, ValueType::Value);
    let b = InternalKey::new(&b"k"[..], 3, ValueType::Value);
    assert_eq!(a.cmp(&b), CmpOrdering::Less);
    assert_eq!(compare_internal_keys(&a.encode(), &b.encode()), CmpOrdering::Less);
}

fn arb_ikey() -> impl Strategy<Value = InternalKey> {
    (
        prop::collection::vec(any::<u8>(), 0..16),
        0..=MAX_SEQUENCE,
        prop_oneof![
            Just(ValueType::Deletion),
            Just(ValueType::Value),
            Just(ValueType::Merge)
        ],
    )
        .prop_map(|(k, seq, t)| InternalKey::new(k, seq, t))
}

proptest! {
    #[test]
    fn encoded_order_matches_struct_order(a in arb_ikey(), b in arb_ikey()) {
        prop_assert_eq!(compare_internal_keys(&a.encode(), &b.encode()), a.cmp(&b));
    }

    #[test]
    fn decode_inverts_encode(k in arb_ikey()) {
        prop_assert_eq!(InternalKey::decode(&k.encode()), Some(k));
    }
}
