use super::helpers::{count_sst_files, open, small_options, test_options};
use crate::*;
use anyhow::Result;
use cache::BlockCache;
use config::{ColumnFamilyOptions, ReadOptions, StringAppendOperator};
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn new_database_has_only_default() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;

    assert_eq!(db.column_family_names(), vec![DEFAULT_COLUMN_FAMILY_NAME.to_string()]);
    let default = db.default_column_family()?;
    assert_eq!(default.name(), DEFAULT_COLUMN_FAMILY_NAME);
    assert_eq!(default.id(), 0);
    assert!(db.column_family("missing").is_none());
    Ok(())
}

#[test]
fn families_are_separate_keyspaces() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let users = db.create_column_family("users", &ColumnFamilyOptions::default())?;

    db.put(b"k", b"default")?;
    db.put_cf(&users, b"k", b"users")?;
    assert_eq!(db.get(b"k")?, Some(b"default".to_vec()));
    assert_eq!(db.get_cf(&users, b"k")?, Some(b"users".to_vec()));

    db.delete_cf(&users, b"k")?;
    assert!(db.get_cf(&users, b"k")?.is_none());
    assert_eq!(db.get(b"k")?, Some(b"default".to_vec()));

    let in_users: Vec<_> = db
        .new_iterator_cf(&ReadOptions::default(), &users)?
        .collect::<crate::Result<_>>()?;
    assert!(in_users.is_empty());
    Ok(())
}

#[test]
fn batch_spans_families_atomically() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let a = db.create_column_family("a", &ColumnFamilyOptions::default())?;
    let b = db.create_column_family("b", &ColumnFamilyOptions::default())?;

    let mut batch = WriteBatch::new();
    batch.put_cf(&a, b"k", b"1");
    batch.put_cf(&b, b"k", b"2");
    batch.put(b"k", b"0");
    db.write(batch)?;

    assert_eq!(db.latest_sequence_number(), 3);
    assert_eq!(db.get_cf(&a, b"k")?, Some(b"1".to_vec()));
    assert_eq!(db.get_cf(&b, b"k")?, Some(b"2".to_vec()));
    assert_eq!(db.get(b"k")?, Some(b"0".to_vec()));
    Ok(())
}

#[test]
fn duplicate_and_invalid_names_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    db.create_column_family("dup", &ColumnFamilyOptions::default())?;

    for name in ["dup", DEFAULT_COLUMN_FAMILY_NAME, ""] {
        let err = db
            .create_column_family(name, &ColumnFamilyOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{name:?}: {err}");
    }
    Ok(())
}

#[test]
fn default_family_cannot_be_dropped() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;

    assert!(matches!(
        db.drop_column_family(DEFAULT_COLUMN_FAMILY_NAME),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        db.drop_column_family("never-created"),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn dropped_family_handle_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let temp = db.create_column_family("temp", &ColumnFamilyOptions::default())?;
    db.put_cf(&temp, b"k", b"v")?;

    db.drop_column_family("temp")?;
    assert!(matches!(db.get_cf(&temp, b"k"), Err(Error::InvalidArgument(_))));
    assert!(matches!(db.put_cf(&temp, b"k", b"v"), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        db.new_iterator_cf(&ReadOptions::default(), &temp),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(db.column_family_names(), vec!["default".to_string()]);

    let mut batch = WriteBatch::new();
    batch.put_cf(&temp, b"k", b"v");
    assert!(matches!(db.write(batch), Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn recreated_family_starts_empty() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;
    let first = db.create_column_family("cf", &ColumnFamilyOptions::default())?;
    db.put_cf(&first, b"k", b"v")?;
    db.drop_column_family("cf")?;

    let second = db.create_column_family("cf", &ColumnFamilyOptions::default())?;
    assert_ne!(first.id(), second.id());
    assert!(db.get_cf(&second, b"k")?.is_none());
    assert!(matches!(db.get_cf(&first, b"k"), Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn handle_of_another_database_is_rejected() -> Result<()> {
    let dir_a = tempdir()?;
    let dir_b = tempdir()?;
    let a = open(dir_a.path())?;
    let b = open(dir_b.path())?;

    let foreign = b.create_column_family("x", &ColumnFamilyOptions::default())?;
    a.create_column_family("x", &ColumnFamilyOptions::default())?;
    assert!(matches!(a.get_cf(&foreign, b"k"), Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn dropped_family_tables_are_deleted() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), &small_options())?;
    let doomed = db.create_column_family("doomed", &small_options().cf)?;

    db.put_cf(&doomed, b"k", b"v")?;
    db.flush_cf(&doomed)?;
    assert_eq!(count_sst_files(dir.path()), 1);

    db.drop_column_family("doomed")?;
    drop(doomed);
    assert_eq!(count_sst_files(dir.path()), 0);
    Ok(())
}

#[test]
fn families_have_their_own_options() -> Result<()> {
    let dir = tempdir()?;
    let db = open(dir.path())?;

    let mut append = ColumnFamilyOptions::default();
    append.set_merge_operator(Arc::new(StringAppendOperator::new("+")));
    let lists = db.create_column_family("lists", &append)?;

    db.merge_cf(&lists, b"k", b"a")?;
    db.merge_cf(&lists, b"k", b"b")?;
    assert_eq!(db.get_cf(&lists, b"k")?, Some(b"a+b".to_vec()));
    assert!(lists.options().merge_operator.is_some());

    // the default family has no operator
    assert!(matches!(db.merge(b"k", b"a"), Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn flush_of_one_family_leaves_others_in_memory() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), &small_options())?;
    let other = db.create_column_family("other", &small_options().cf)?;

    db.put(b"k", b"v")?;
    db.put_cf(&other, b"k", b"v")?;
    db.flush_cf(&other)?;

    assert_eq!(db.level_file_counts(&other)?[0], 1);
    assert_eq!(db.level_file_counts(&db.default_column_family()?)?[0], 0);
    Ok(())
}

#[test]
fn families_may_share_a_block_cache() -> Result<()> {
    let dir = tempdir()?;
    let shared = BlockCache::new_lru(1 << 20);
    let mut cf_opts = ColumnFamilyOptions::default();
    cf_opts.table.set_block_cache(Arc::clone(&shared));
    let mut opts = test_options();
    opts.cf = cf_opts.clone();

    let db = Db::open(dir.path(), &opts)?;
    let one = db.create_column_family("one", &cf_opts)?;
    let two = db.create_column_family("two", &cf_opts)?;
    for cf in [&one, &two] {
        db.put_cf(cf, b"same-key", cf.name())?;
        db.flush_cf(cf)?;
    }

    assert_eq!(db.get_cf(&one, b"same-key")?, Some(b"one".to_vec()));
    assert_eq!(db.get_cf(&two, b"same-key")?, Some(b"two".to_vec()));
    assert_eq!(db.get_cf(&one, b"same-key")?, Some(b"one".to_vec()));
    assert!(shared.get_usage() > 0);
    Ok(())
}
