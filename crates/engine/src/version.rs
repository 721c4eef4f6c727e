//! Immutable descriptions of which tables make up a column family.
//!
//! A [`Version`] is never modified once published: flushes and compactions
//! build a new one with [`Version::apply`] and swap it in. Every reader,
//! iterator and in-flight compaction holds the version (and through it the
//! [`FileMetaData`]) it started with, so a table that compaction replaced
//! stays readable until the last of them lets go. Dropping the last
//! reference to a file marked obsolete unlinks it.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use memtable::InternalKey;
use sstable::Table;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub struct FileMetaData {
    pub number: u64,
    pub size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub table: Arc<Table>,
    obsolete: AtomicBool,
}

impl FileMetaData {
    pub(crate) fn from_table(table: Arc<Table>) -> Result<Self> {
        let props = table.properties();
        let smallest = InternalKey::decode(&props.smallest_key);
        let largest = InternalKey::decode(&props.largest_key);
        let (smallest, largest) = match (smallest, largest) {
            (Some(s), Some(l)) => (s, l),
            _ => {
                return Err(Error::Corruption(format!(
                    "{}: malformed key range in table properties",
                    table.path().display()
                )))
            }
        };
        Ok(Self {
            number: table.file_number(),
            size: table.file_size(),
            smallest,
            largest,
            table,
            obsolete: AtomicBool::new(false),
        })
    }

    pub fn smallest_user_key(&self) -> &[u8] {
        &self.smallest.user_key
    }

    pub fn largest_user_key(&self) -> &[u8] {
        &self.largest.user_key
    }

    pub fn contains_user_key(&self, key: &[u8]) -> bool {
        self.smallest_user_key() <= key && key <= self.largest_user_key()
    }

    /// Whether `[lo, hi]` (inclusive user keys) touches this file.
    pub fn overlaps(&self, lo: &[u8], hi: &[u8]) -> bool {
        !(self.largest_user_key() < lo || hi < self.smallest_user_key())
    }

    pub fn largest_seq(&self) -> u64 {
        self.table.properties().largest_seq
    }

    /// Schedules the file for deletion once no version references it.
    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::Release);
    }
}

impl Drop for FileMetaData {
    fn drop(&mut self) {
        if !self.obsolete.load(AtomicOrdering::Acquire) {
            return;
        }
        let path = self.table.path();
        match fs::remove_file(path) {
            Ok(()) => debug!(file = self.number, "deleted obsolete table"),
            Err(e) => warn!(file = self.number, error = %e, "failed to delete obsolete table"),
        }
    }
}

impl std::fmt::Debug for FileMetaData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMetaData")
            .field("number", &self.number)
            .field("size", &self.size)
            .field("smallest", &String::from_utf8_lossy(self.smallest_user_key()))
            .field("largest", &String::from_utf8_lossy(self.largest_user_key()))
            .finish()
    }
}

/// Files added to and removed from a version by one flush or compaction.
#[derive(Default)]
pub(crate) struct VersionEdit {
    pub deleted: Vec<(usize, u64)>,
    pub added: Vec<(usize, Arc<FileMetaData>)>,
}

/// Table files per level. L0 is ordered newest first and may overlap; every
/// deeper level is sorted by key range and never overlaps.
#[derive(Debug, Clone)]
pub struct Version {
    levels: Vec<Vec<Arc<FileMetaData>>>,
}

impl Version {
    pub(crate) fn new(num_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels.max(2)],
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        self.levels.get(level).map_or(&[], Vec::as_slice)
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files(level).len()
    }

    pub fn file_counts(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files(level).iter().map(|f| f.size).sum()
    }

    pub fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<FileMetaData>)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }

    /// Files of `level` whose range intersects `[lo, hi]`.
    pub fn overlapping(&self, level: usize, lo: &[u8], hi: &[u8]) -> Vec<Arc<FileMetaData>> {
        self.files(level)
            .iter()
            .filter(|f| f.overlaps(lo, hi))
            .cloned()
            .collect()
    }

    /// The single file of sorted `level` (>= 1) that may hold `key`.
    pub(crate) fn find_file(&self, level: usize, key: &[u8]) -> Option<&Arc<FileMetaData>> {
        let files = self.files(level);
        let idx = files.partition_point(|f| f.largest_user_key() < key);
        files.get(idx).filter(|f| f.smallest_user_key() <= key)
    }

    /// Whether any level deeper than `level` has a file covering `key`.
    pub(crate) fn key_may_exist_below(&self, level: usize, key: &[u8]) -> bool {
        (level + 1..self.levels.len()).any(|l| self.find_file(l, key).is_some())
    }

    /// A new version with `edit` applied. Unknown deletions are an error.
    pub(crate) fn apply(&self, edit: &VersionEdit) -> Result<Version> {
        let mut levels = self.levels.clone();
        for &(level, number) in &edit.deleted {
            let files = levels.get_mut(level).ok_or_else(|| {
                Error::Corruption(format!("edit deletes from missing level {level}"))
            })?;
            let before = files.len();
            files.retain(|f| f.number != number);
            if files.len() == before {
                return Err(Error::Corruption(format!(
                    "edit deletes file {number} which is not in level {level}"
                )));
            }
        }
        for (level, file) in &edit.added {
            let files = levels.get_mut(*level).ok_or_else(|| {
                Error::Corruption(format!("edit adds to missing level {level}"))
            })?;
            files.push(Arc::clone(file));
        }

        for (level, files) in levels.iter_mut().enumerate() {
            if level == 0 {
                files.sort_by(|a, b| b.number.cmp(&a.number));
            } else {
                files.sort_by(|a, b| a.smallest.cmp(&b.smallest));
                if let Some(pair) = files
                    .windows(2)
                    .find(|w| w[0].largest_user_key() >= w[1].smallest_user_key())
                {
                    return Err(Error::Corruption(format!(
                        "files {} and {} overlap in level {level}",
                        pair[0].number, pair[1].number
                    )));
                }
            }
        }
        Ok(Version { levels })
    }

    /// Memory held by table readers outside the block cache.
    pub fn table_readers_memory(&self) -> usize {
        self.all_files()
            .map(|(_, f)| f.table.approximate_memory_usage())
            .sum()
    }
}

