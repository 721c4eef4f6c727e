use super::*;

fn keys(n: u64) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("key{:06}", i).into_bytes()).collect()
}

fn build(policy: &BloomFilterPolicy, keys: &[Vec<u8>]) -> Vec<u8> {
    let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    policy.create_filter(&refs)
}

// -------------------- Construction --------------------

#[test]
fn tiny_filters_get_the_minimum_size() {
    let bf = BloomFilter::with_bits_per_key(1, 10);
    assert_eq!(bf.num_bits(), 64);
    assert_eq!(bf.num_probes(), 7);
}

#[test]
fn probe_count_follows_bits_per_key() {
    assert_eq!(BloomFilter::with_bits_per_key(100, 1).num_probes(), 1);
    assert_eq!(BloomFilter::with_bits_per_key(100, 20).num_probes(), 14);
    assert_eq!(BloomFilter::with_bits_per_key(100, 200).num_probes(), MAX_PROBES);
}

#[test]
fn false_positive_rate_sizing() {
    // 1% needs about 9.6 bits per key
    let bf = BloomFilter::for_false_positive_rate(1000, 0.01);
    assert_eq!(bf.num_bits(), 10_000);
}

#[test]
#[should_panic(expected = "false_positive_rate must be in (0, 1)")]
fn false_positive_rate_of_one_panics() {
    BloomFilter::for_false_positive_rate(100, 1.0);
}

#[test]
#[should_panic(expected = "bits_per_key must be > 0")]
fn policy_rejects_zero_bits_per_key() {
    BloomFilterPolicy::new(0);
}

// -------------------- Membership --------------------

#[test]
fn empty_filter_contains_nothing() {
    let bf = BloomFilter::with_bits_per_key(100, 10);
    assert!(!bf.may_contain(b"hello"));
}

#[test]
fn inserted_keys_are_found() {
    let mut bf = BloomFilter::with_bits_per_key(1000, 10);
    for i in 0..1000u64 {
        bf.insert(&i.to_le_bytes());
    }
    for i in 0..1000u64 {
        assert!(bf.may_contain(&i.to_le_bytes()), "key {} should be found", i);
    }
}

#[test]
fn ten_bits_per_key_keeps_fpr_low() {
    let policy = BloomFilterPolicy::new(10);
    let filter = build(&policy, &keys(5_000));

    let false_positives = (5_000..15_000u64)
        .filter(|i| policy.key_may_match(format!("key{:06}", i).as_bytes(), &filter))
        .count();
    // ~1% expected at 10 bits/key; allow generous slack
    assert!(false_positives < 300, "too many false positives: {}", false_positives);
}

// -------------------- Policy --------------------

#[test]
fn policy_never_returns_false_negatives() {
    let policy = BloomFilterPolicy::new(4);
    let keys = keys(300);
    let filter = build(&policy, &keys);
    for k in &keys {
        assert!(policy.key_may_match(k, &filter));
    }
}

#[test]
fn policy_with_no_keys_builds_a_filter() {
    let policy = BloomFilterPolicy::new(10);
    let filter = policy.create_filter(&[]);
    assert_eq!(filter.len(), 9);
    assert!(!policy.key_may_match(b"anything", &filter));
}

#[test]
fn malformed_filters_match_everything() {
    let policy = BloomFilterPolicy::new(10);
    assert!(policy.key_may_match(b"k", &[]));
    assert!(policy.key_may_match(b"k", &[7]));
    // reserved probe counts
    assert!(policy.key_may_match(b"k", &[0, 0, 0]));
    assert!(policy.key_may_match(b"k", &[0, 0, 31]));
}

#[test]
fn policy_name_is_stable() {
    assert_eq!(BloomFilterPolicy::new(10).name(), "shale.BloomFilter");
}

// -------------------- Encoding --------------------

#[test]
fn encoding_ends_with_probe_count() {
    let mut bf = BloomFilter::with_bits_per_key(500, 10);
    for i in 0..500u64 {
        bf.insert(&i.to_le_bytes());
    }

    let encoded = bf.encode();
    assert_eq!(encoded.len(), bf.num_bits() / 8 + 1);
    assert_eq!(encoded.last(), Some(&bf.num_probes()));
    assert_eq!(BloomFilter::decode(&encoded), Some(bf.clone()));
    for i in 0..500u64 {
        assert!(may_match(&encoded, &i.to_le_bytes()));
    }
}

#[test]
fn decode_rejects_reserved_encodings() {
    assert!(BloomFilter::decode(&[]).is_none());
    assert!(BloomFilter::decode(&[3]).is_none());
    assert!(BloomFilter::decode(&[0xff, 0]).is_none());
    assert!(BloomFilter::decode(&[0xff, 200]).is_none());
    assert!(BloomFilter::decode(&[0xff, 2]).is_some());
}

#[test]
fn debug_shows_shape() {
    let bf = BloomFilter::with_bits_per_key(100, 10);
    let debug = format!("{:?}", bf);
    assert!(debug.contains("BloomFilter"));
    assert!(debug.contains("num_probes"));
}
