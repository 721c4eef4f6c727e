use super::*;
use std::collections::HashMap;
use std::time::Duration;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

// -------------------- Defaults --------------------

#[test]
fn background_defaults() {
    let opts = Options::default();
    assert_eq!(opts.max_background_jobs(), 2);
    assert_eq!(opts.max_subcompactions(), 1);
    assert_eq!(opts.write_stall_timeout, Duration::from_secs(10));
    assert_eq!(opts.wal_sync, SyncPolicy::Manual);
    assert_eq!(opts.wal_recovery_mode, WalRecoveryMode::TolerateCorruptedTail);
    assert!(opts.statistics.is_none());
}

#[test]
fn background_setters() {
    let mut opts = Options::default();
    opts.set_max_background_jobs(10);
    opts.set_max_subcompactions(4);
    assert_eq!(opts.max_background_jobs(), 10);
    assert_eq!(opts.max_subcompactions(), 4);

    opts.set_max_background_jobs(0);
    assert_eq!(opts.max_background_jobs(), 1);
}

#[test]
fn column_family_defaults() {
    let cf = ColumnFamilyOptions::default();
    assert_eq!(cf.write_buffer_size, 4 * 1024 * 1024);
    assert_eq!(cf.max_write_buffer_number, 2);
    assert_eq!(cf.level0_file_num_compaction_trigger, 4);
    assert_eq!(cf.level0_slowdown_writes_trigger, 20);
    assert_eq!(cf.level0_stop_writes_trigger, 36);
    assert_eq!(cf.num_levels, 7);
    assert_eq!(cf.target_file_size_base, 8 * 1024 * 1024);
    assert_eq!(cf.table.block_size, 4096);
    assert_eq!(cf.table.compression, CompressionType::None);
    assert_eq!(cf.table.bloom_bits_per_key, Some(10));
    assert!(cf.merge_operator.is_none());
}

#[test]
fn level_targets_grow_by_multiplier() {
    let cf = ColumnFamilyOptions::default();
    assert_eq!(cf.max_bytes_for_level(1), 64 * 1024 * 1024);
    assert_eq!(cf.max_bytes_for_level(2), 640 * 1024 * 1024);
    assert_eq!(cf.max_bytes_for_level(3), 6400 * 1024 * 1024);
}

#[test]
fn compression_tag_roundtrip() {
    for c in [CompressionType::None, CompressionType::Lz4, CompressionType::Zstd] {
        assert_eq!(CompressionType::from_u8(c.as_u8()), Some(c));
    }
    assert_eq!(CompressionType::from_u8(9), None);
}

// -------------------- Read options --------------------

#[test]
fn iterate_bounds_keep_only_last_setting() {
    let mut ro = ReadOptions::default();
    ro.set_iterate_lower_bound(b"a".to_vec());
    ro.set_iterate_upper_bound(b"z".to_vec());
    ro.set_iterate_lower_bound(b"b".to_vec());
    ro.set_iterate_upper_bound(b"c".to_vec());
    assert_eq!(ro.iterate_lower_bound(), Some(&b"b"[..]));
    assert_eq!(ro.iterate_upper_bound(), Some(&b"c"[..]));

    ro.clear_iterate_bounds();
    assert!(ro.iterate_lower_bound().is_none());
    assert!(ro.iterate_upper_bound().is_none());
}

#[test]
fn read_options_defaults() {
    let ro = ReadOptions::default();
    assert!(ro.fill_cache);
    assert!(ro.verify_checksums);
    assert!(ro.snapshot.is_none());
    assert!(TransactionOptions::default().set_snapshot);
    let wo = WriteOptions::default();
    assert!(!wo.sync && !wo.disable_wal && !wo.no_slowdown);
}

// -------------------- Merge operators --------------------

#[test]
fn string_append_joins_existing_then_operands() {
    let op = StringAppendOperator::default();
    let out = op.full_merge(b"k", Some(&b"a"[..]), &[&b"b"[..], &b"c"[..]]);
    assert_eq!(out.as_deref(), Some(&b"a,b,c"[..]));
}

#[test]
fn string_append_without_existing() {
    let op = StringAppendOperator::new("|");
    let out = op.full_merge(b"k", None, &[&b"x"[..], &b"y"[..]]);
    assert_eq!(out.as_deref(), Some(&b"x|y"[..]));
}

#[test]
fn uint64_add_sums() {
    let op = UInt64AddOperator;
    let out = op
        .full_merge(
            b"k",
            Some(&5u64.to_le_bytes()[..]),
            &[&1u64.to_le_bytes()[..], &2u64.to_le_bytes()[..]],
        )
        .unwrap();
    assert_eq!(u64::from_le_bytes(out.try_into().unwrap()), 8);
}

#[test]
fn uint64_add_rejects_bad_width() {
    let op = UInt64AddOperator;
    assert!(op.full_merge(b"k", Some(&b"abc"[..]), &[]).is_none());
    assert!(op.full_merge(b"k", None, &[&b"short"[..]]).is_none());
}

// -------------------- Environment --------------------

#[test]
fn env_overrides_defaults() {
    let mut opts = Options::default();
    opts.apply_env(lookup_from(&[
        ("SHALE_WRITE_BUFFER_KB", "64"),
        ("SHALE_WAL_SYNC", "true"),
        ("SHALE_L0_TRIGGER", "8"),
        ("SHALE_MAX_BACKGROUND_JOBS", "3"),
        ("SHALE_BLOCK_CACHE_KB", "1024"),
        ("SHALE_COMPRESSION", "zstd"),
    ]))
    .unwrap();

    assert_eq!(opts.cf.write_buffer_size, 64 * 1024);
    assert_eq!(opts.wal_sync, SyncPolicy::Always);
    assert_eq!(opts.cf.level0_file_num_compaction_trigger, 8);
    assert_eq!(opts.max_background_jobs(), 3);
    assert_eq!(opts.block_cache_capacity, 1024 * 1024);
    assert_eq!(opts.cf.table.compression, CompressionType::Zstd);
}

#[test]
fn env_zero_trigger_disables_auto_compaction() {
    let mut opts = Options::default();
    opts.apply_env(lookup_from(&[("SHALE_L0_TRIGGER", "0")])).unwrap();
    assert!(opts.cf.disable_auto_compactions);
    assert_eq!(opts.cf.level0_file_num_compaction_trigger, 4);
}

#[test]
fn env_unset_keeps_defaults() {
    let mut opts = Options::default();
    opts.apply_env(|_| None).unwrap();
    assert_eq!(opts.cf.write_buffer_size, 4 * 1024 * 1024);
    assert_eq!(opts.block_cache_capacity, 8 * 1024 * 1024);
}

#[test]
fn env_rejects_garbage() {
    let mut opts = Options::default();
    let err = opts
        .apply_env(lookup_from(&[("SHALE_WRITE_BUFFER_KB", "lots")]))
        .unwrap_err();
    assert!(err.to_string().contains("SHALE_WRITE_BUFFER_KB"));

    assert!(opts
        .apply_env(lookup_from(&[("SHALE_COMPRESSION", "snappy")]))
        .is_err());
    assert!(opts
        .apply_env(lookup_from(&[("SHALE_WAL_SYNC", "sometimes")]))
        .is_err());
}

#[test]
fn enable_statistics_is_idempotent() {
    let mut opts = Options::default();
    let a = opts.enable_statistics();
    let b = opts.enable_statistics();
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}

#[test]
fn options_debug_names_merge_operator() {
    let mut opts = Options::default();
    opts.set_merge_operator(std::sync::Arc::new(StringAppendOperator::default()));
    let dbg = format!("{:?}", opts);
    assert!(dbg.contains("StringAppendOperator"));
}
