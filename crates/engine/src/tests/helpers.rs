use std::fs;
use std::path::Path;
use std::sync::Arc;

use config::{Options, StringAppendOperator};

use crate::{Db, Result};

fn count_with_extension(dir: &Path, wanted: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == wanted)
                .unwrap_or(false)
        })
        .count()
}

pub fn count_sst_files(dir: &Path) -> usize {
    count_with_extension(dir, "sst")
}

pub fn count_wal_files(dir: &Path) -> usize {
    count_with_extension(dir, "log")
}

/// Options that create the database, keep everything else at defaults.
pub fn test_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing = true;
    opts
}

/// Tiny memtables and no automatic compaction, so tests decide exactly when
/// tables appear and move.
pub fn small_options() -> Options {
    let mut opts = test_options();
    opts.cf.write_buffer_size = 1024;
    opts.cf.disable_auto_compactions = true;
    opts
}

pub fn append_options() -> Options {
    let mut opts = test_options();
    opts.set_merge_operator(Arc::new(StringAppendOperator::default()));
    opts
}

pub fn open(dir: &Path) -> Result<Db> {
    Db::open(dir, &test_options())
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key{:05}", i).into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value{:05}", i).into_bytes()
}

pub fn collect(db: &Db, ro: &config::ReadOptions) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    db.new_iterator(ro)?.collect()
}

pub fn keys_of(pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<&[u8]> {
    pairs.iter().map(|(k, _)| k.as_slice()).collect()
}
