//! Random operation sequences checked against an in-memory `BTreeMap`.

use super::helpers::{append_options, collect};
use crate::*;
use config::{Options, ReadOptions};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::tempdir;

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone)]
enum Op {
    Put(u8, Vec<u8>),
    Delete(u8),
    Merge(u8, Vec<u8>),
    Flush,
    CompactRange,
    Snapshot,
    Reopen,
}

fn arb_op() -> impl Strategy<Value = Op> {
    let value = prop::collection::vec(b'a'..=b'z', 1..24);
    prop_oneof![
        6 => (0u8..12, value.clone()).prop_map(|(k, v)| Op::Put(k, v)),
        2 => (0u8..12).prop_map(Op::Delete),
        2 => (0u8..12, value).prop_map(|(k, v)| Op::Merge(k, v)),
        1 => Just(Op::Flush),
        1 => Just(Op::CompactRange),
        1 => Just(Op::Snapshot),
        1 => Just(Op::Reopen),
    ]
}

fn model_key(k: u8) -> Vec<u8> {
    format!("k{k:02}").into_bytes()
}

/// Small memtables and an eager L0 trigger, so background flushes and
/// compactions run while operations are applied.
fn model_options() -> Options {
    let mut opts = append_options();
    opts.cf.write_buffer_size = 512;
    opts.cf.level0_file_num_compaction_trigger = 2;
    opts.cf.target_file_size_base = 1024;
    opts.cf.max_bytes_for_level_base = 4096;
    opts
}

fn apply(model: &mut Model, op: &Op) {
    match op {
        Op::Put(k, v) => {
            model.insert(model_key(*k), v.clone());
        }
        Op::Delete(k) => {
            model.remove(&model_key(*k));
        }
        Op::Merge(k, v) => {
            let entry = model.entry(model_key(*k)).or_default();
            if !entry.is_empty() {
                entry.push(b',');
            }
            entry.extend_from_slice(v);
        }
        _ => {}
    }
}

fn check_against(db: &Db, model: &Model, ro: &ReadOptions) -> anyhow::Result<()> {
    let expected: Vec<(Vec<u8>, Vec<u8>)> = model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(collect(db, ro)?, expected);
    for k in 0..12 {
        let key = model_key(k);
        assert_eq!(db.get_opt(ro, &key)?, model.get(&key).cloned(), "key {k}");
    }
    Ok(())
}

fn run(dir: &Path, ops: &[Op]) -> anyhow::Result<()> {
    let opts = model_options();
    let mut db = Db::open(dir, &opts)?;
    let mut model = Model::new();
    let mut snapshots: Vec<(Snapshot, Model)> = Vec::new();

    for op in ops {
        match op {
            Op::Put(k, v) => db.put(model_key(*k), v)?,
            Op::Delete(k) => db.delete(model_key(*k))?,
            Op::Merge(k, v) => db.merge(model_key(*k), v)?,
            Op::Flush => db.flush()?,
            Op::CompactRange => db.compact_range()?,
            Op::Snapshot => snapshots.push((db.snapshot(), model.clone())),
            Op::Reopen => {
                snapshots.clear();
                drop(db);
                db = Db::open(dir, &opts)?;
            }
        }
        apply(&mut model, op);
    }

    check_against(&db, &model, &ReadOptions::default())?;
    for (snapshot, seen) in &snapshots {
        check_against(&db, seen, &snapshot.read_options())?;
    }

    snapshots.clear();
    drop(db);
    let db = Db::open(dir, &opts)?;
    check_against(&db, &model, &ReadOptions::default())?;
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn matches_btreemap_model(ops in prop::collection::vec(arb_op(), 1..120)) {
        let dir = tempdir().unwrap();
        run(dir.path(), &ops).unwrap();
    }
}
