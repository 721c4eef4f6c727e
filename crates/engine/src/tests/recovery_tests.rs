use super::helpers::{count_sst_files, count_wal_files, key, open, small_options, test_options, value};
use crate::*;
use anyhow::Result;
use config::{ColumnFamilyOptions, Options, WalRecoveryMode};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn newest_wal_segment(dir: &Path) -> PathBuf {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("log"))
        .collect();
    logs.sort();
    logs.pop().expect("at least one WAL segment")
}

fn append_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = OpenOptions::new().append(true).open(path)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(())
}

// --------------------- Open modes ---------------------

#[test]
fn missing_database_without_create_fails() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    let err = Db::open(&path, &Options::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    assert!(!path.exists());
    Ok(())
}

#[test]
fn error_if_exists_rejects_existing_database() -> Result<()> {
    let dir = tempdir()?;
    drop(open(dir.path())?);

    let mut opts = test_options();
    opts.error_if_exists = true;
    assert!(matches!(
        Db::open(dir.path(), &opts),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn open_creates_nested_directory() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("a").join("b");

    let db = Db::open(&path, &test_options())?;
    db.put(b"k", b"v")?;
    assert_eq!(db.path(), path.as_path());
    assert!(path.join("MANIFEST").exists());
    Ok(())
}

// --------------------- WAL replay ---------------------

#[test]
fn unflushed_writes_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open(dir.path())?;
        db.put(b"a", b"1")?;
        db.put(b"b", b"2")?;
        db.delete(b"a")?;
    }

    let db = open(dir.path())?;
    assert!(db.get(b"a")?.is_none());
    assert_eq!(db.get(b"b")?, Some(b"2".to_vec()));
    assert_eq!(db.latest_sequence_number(), 3);
    Ok(())
}

#[test]
fn sequence_numbers_continue_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open(dir.path())?;
        for i in 0..10 {
            db.put(key(i), value(i))?;
        }
    }

    let db = open(dir.path())?;
    assert_eq!(db.latest_sequence_number(), 10);
    db.put(b"next", b"v")?;
    assert_eq!(db.latest_sequence_number(), 11);
    Ok(())
}

#[test]
fn recovery_flushes_replayed_data_and_retires_segments() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open(dir.path())?;
        db.put(b"k", b"v")?;
    }
    assert_eq!(count_sst_files(dir.path()), 0);

    let db = open(dir.path())?;
    assert_eq!(count_sst_files(dir.path()), 1);
    assert_eq!(count_wal_files(dir.path()), 1, "only the fresh segment remains");
    assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn many_reopen_cycles_keep_everything() -> Result<()> {
    let dir = tempdir()?;
    for round in 0..5 {
        let db = Db::open(dir.path(), &small_options())?;
        for i in 0..40 {
            db.put(key(round * 40 + i), value(round * 40 + i))?;
        }
        if round % 2 == 0 {
            db.flush()?;
        }
    }

    let db = Db::open(dir.path(), &small_options())?;
    for i in 0..200 {
        assert_eq!(db.get(key(i))?, Some(value(i)), "key {i}");
    }
    Ok(())
}

#[test]
fn merge_operands_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let opts = super::helpers::append_options();
    {
        let db = Db::open(dir.path(), &opts)?;
        db.put(b"k", b"a")?;
        db.flush()?;
        db.merge(b"k", b"b")?;
    }

    let db = Db::open(dir.path(), &opts)?;
    assert_eq!(db.get(b"k")?, Some(b"a,b".to_vec()));
    Ok(())
}

// --------------------- Damage ---------------------

#[test]
fn torn_wal_tail_is_tolerated_by_default() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open(dir.path())?;
        db.put(b"k", b"v")?;
    }
    append_bytes(&newest_wal_segment(dir.path()), &[0xde, 0xad, 0xbe])?;

    let db = open(dir.path())?;
    assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn torn_wal_tail_fails_strict_recovery() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open(dir.path())?;
        db.put(b"k", b"v")?;
    }
    append_bytes(&newest_wal_segment(dir.path()), &[0xde, 0xad, 0xbe])?;

    let mut opts = test_options();
    opts.wal_recovery_mode = WalRecoveryMode::Strict;
    assert!(matches!(
        Db::open(dir.path(), &opts),
        Err(Error::Corruption(_))
    ));
    Ok(())
}

#[test]
fn truncated_table_is_corruption() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Db::open(dir.path(), &small_options())?;
        db.put(b"k", b"v")?;
        db.flush()?;
    }
    let table = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().and_then(|s| s.to_str()) == Some("sst"))
        .expect("one table");
    let len = fs::metadata(&table)?.len();
    OpenOptions::new().write(true).open(&table)?.set_len(len - 1)?;

    assert!(Db::open(dir.path(), &small_options()).is_err());
    Ok(())
}

// --------------------- Cleanup ---------------------

#[test]
fn leftover_tmp_and_orphan_tables_are_removed() -> Result<()> {
    let dir = tempdir()?;
    drop(open(dir.path())?);

    fs::write(dir.path().join("000099.sst.tmp"), b"partial")?;
    fs::write(dir.path().join("000098.sst"), b"not referenced")?;

    let db = open(dir.path())?;
    assert!(!dir.path().join("000099.sst.tmp").exists());
    assert!(!dir.path().join("000098.sst").exists());

    // new tables are numbered past any name seen on disk
    db.put(b"k", b"v")?;
    db.flush()?;
    assert!(!dir.path().join("000098.sst").exists());
    assert_eq!(count_sst_files(dir.path()), 1);
    Ok(())
}

// --------------------- Column families ---------------------

#[test]
fn column_families_persist() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open(dir.path())?;
        let users = db.create_column_family("users", &ColumnFamilyOptions::default())?;
        db.put_cf(&users, b"alice", b"1")?;
        db.put(b"k", b"default")?;
    }

    let db = open(dir.path())?;
    assert_eq!(db.column_family_names(), vec!["default", "users"]);
    let users = db.column_family("users").expect("users reopened");
    assert_eq!(db.get_cf(&users, b"alice")?, Some(b"1".to_vec()));
    assert!(db.get(b"alice")?.is_none());
    assert_eq!(db.get(b"k")?, Some(b"default".to_vec()));
    Ok(())
}

#[test]
fn dropped_family_is_not_resurrected() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open(dir.path())?;
        let temp = db.create_column_family("temp", &ColumnFamilyOptions::default())?;
        db.put_cf(&temp, b"k", b"v")?;
        db.drop_column_family("temp")?;
    }

    let db = open(dir.path())?;
    assert_eq!(db.column_family_names(), vec!["default"]);
    assert!(db.column_family("temp").is_none());
    Ok(())
}

#[test]
fn open_cf_rejects_unknown_family_without_create() -> Result<()> {
    let dir = tempdir()?;
    drop(open(dir.path())?);

    let descriptors = [ColumnFamilyDescriptor::new("extra", ColumnFamilyOptions::default())];
    assert!(matches!(
        Db::open_cf(dir.path(), &test_options(), &descriptors),
        Err(Error::InvalidArgument(_))
    ));

    let mut opts = test_options();
    opts.create_missing_column_families = true;
    let db = Db::open_cf(dir.path(), &opts, &descriptors)?;
    assert!(db.column_family("extra").is_some());
    Ok(())
}

#[test]
fn open_cf_applies_descriptor_options() -> Result<()> {
    let dir = tempdir()?;
    let mut opts = test_options();
    opts.create_missing_column_families = true;

    let mut cf_opts = ColumnFamilyOptions::default();
    cf_opts.write_buffer_size = 12345;
    let descriptors = [ColumnFamilyDescriptor::new("tuned", cf_opts)];
    let db = Db::open_cf(dir.path(), &opts, &descriptors)?;

    let tuned = db.column_family("tuned").expect("created");
    assert_eq!(tuned.options().write_buffer_size, 12345);
    Ok(())
}
