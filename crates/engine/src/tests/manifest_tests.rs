use super::helpers::{open, small_options, test_options};
use crate::manifest::{CfRecord, FileRecord, Manifest, MANIFEST_FILENAME};
use crate::*;
use anyhow::Result;
use config::ColumnFamilyOptions;
use std::fs;
use tempfile::tempdir;

#[test]
fn missing_manifest_loads_as_none() -> Result<()> {
    let dir = tempdir()?;
    assert!(Manifest::load(dir.path())?.is_none());
    Ok(())
}

#[test]
fn save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let mut m = Manifest::new(dir.path());
    m.next_file_number = 42;
    m.last_sequence = 1907;
    m.next_cf_id = 2;
    m.column_families.push(CfRecord {
        id: 1,
        log_number: 40,
        name: "user data".to_string(),
    });
    m.column_families.push(CfRecord {
        id: 0,
        log_number: 39,
        name: "default".to_string(),
    });
    m.files.push(FileRecord {
        cf: 1,
        level: 2,
        number: 31,
        size: 4177302,
    });
    m.save()?;

    let loaded = Manifest::load(dir.path())?.expect("manifest exists");
    assert_eq!(loaded.next_file_number, 42);
    assert_eq!(loaded.last_sequence, 1907);
    assert_eq!(loaded.next_cf_id, 2);
    // sorted by id on load; names may contain spaces
    assert_eq!(loaded.column_family_names(), vec!["default", "user data"]);
    assert_eq!(loaded.files_of(1).count(), 1);
    assert_eq!(loaded.files_of(0).count(), 0);
    assert!(!dir.path().join("MANIFEST.tmp").exists());
    Ok(())
}

#[test]
fn comments_and_blank_lines_are_ignored() -> Result<()> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join(MANIFEST_FILENAME),
        "# header\n\nnext_file_number 7\n   \ncf 0 3 default\n",
    )?;

    let m = Manifest::load(dir.path())?.expect("manifest exists");
    assert_eq!(m.next_file_number, 7);
    assert_eq!(m.column_family_names(), vec!["default"]);
    Ok(())
}

#[test]
fn garbage_line_is_corruption() -> Result<()> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join(MANIFEST_FILENAME),
        "next_file_number 7\nfile 0 0 not-a-number 10\n",
    )?;

    let err = Manifest::load(dir.path()).unwrap_err();
    assert!(matches!(err, Error::Corruption(_)), "{err}");
    assert!(err.to_string().contains("line 2"));
    Ok(())
}

#[test]
fn open_fails_on_corrupt_manifest() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join(MANIFEST_FILENAME), "bogus\n")?;

    assert!(matches!(
        Db::open(dir.path(), &test_options()),
        Err(Error::Corruption(_))
    ));
    Ok(())
}

#[test]
fn flush_and_compaction_are_recorded() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Db::open(dir.path(), &small_options())?;
        db.put(b"k", b"v")?;
        db.flush()?;
    }
    let m = Manifest::load(dir.path())?.expect("manifest exists");
    assert_eq!(m.files.len(), 1);
    assert_eq!(m.files[0].level, 0);
    assert!(m.last_sequence >= 1);

    {
        let db = Db::open(dir.path(), &small_options())?;
        db.compact_range()?;
    }
    let m = Manifest::load(dir.path())?.expect("manifest exists");
    assert_eq!(m.files.len(), 1);
    assert_eq!(m.files[0].level, ColumnFamilyOptions::default().num_levels - 1);
    Ok(())
}

#[test]
fn list_column_families_reads_manifest() -> Result<()> {
    let dir = tempdir()?;
    assert!(matches!(
        Db::list_column_families(dir.path()),
        Err(Error::InvalidArgument(_))
    ));

    {
        let db = open(dir.path())?;
        db.create_column_family("a", &ColumnFamilyOptions::default())?;
        db.create_column_family("b", &ColumnFamilyOptions::default())?;
        db.drop_column_family("a")?;
    }
    assert_eq!(Db::list_column_families(dir.path())?, vec!["default", "b"]);
    Ok(())
}
