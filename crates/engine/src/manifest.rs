//! # Manifest - column families, table levels and counters
//!
//! Records everything needed to rebuild the set of live versions after a
//! restart: the column families, which table files belong to which level of
//! which column family, and the counters that must never go backwards.
//!
//! ## File Format
//!
//! A text file with one record per line:
//!
//! ```text
//! next_file_number 42
//! last_sequence 1907
//! next_cf_id 2
//! cf 0 40 default
//! cf 1 40 users
//! file 0 0 39 10482
//! file 1 2 31 4177302
//! ```
//!
//! `cf <id> <log_number> <name>`: WAL segments numbered below `log_number`
//! hold no unflushed data for that column family. The name is the rest of
//! the line. `file <cf> <level> <number> <size>`: one live table.
//!
//! Lines starting with `#` are comments. Empty lines are ignored.
//!
//! ## Crash Safety
//!
//! The manifest is rewritten atomically: write to a `.tmp` file, fsync, then
//! rename over the existing manifest.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the manifest file within the database directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file used during atomic manifest writes.
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CfRecord {
    pub id: u32,
    pub log_number: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileRecord {
    pub cf: u32,
    pub level: usize,
    pub number: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Manifest {
    path: PathBuf,
    pub next_file_number: u64,
    pub last_sequence: u64,
    pub next_cf_id: u32,
    /// In id order, which is creation order.
    pub column_families: Vec<CfRecord>,
    pub files: Vec<FileRecord>,
}

impl Manifest {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(MANIFEST_FILENAME),
            next_file_number: 1,
            last_sequence: 0,
            next_cf_id: 0,
            column_families: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Loads `dir/MANIFEST`, or `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// `Corruption` when the file exists but cannot be parsed.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILENAME);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut manifest = Self::new(dir);
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            manifest
                .parse_line(trimmed)
                .ok_or_else(|| bad_line(line_num + 1, trimmed))?;
        }

        manifest.column_families.sort_by_key(|cf| cf.id);
        Ok(Some(manifest))
    }

    fn parse_line(&mut self, line: &str) -> Option<()> {
        let (tag, rest) = line.split_once(' ')?;
        match tag {
            "next_file_number" => self.next_file_number = rest.trim().parse().ok()?,
            "last_sequence" => self.last_sequence = rest.trim().parse().ok()?,
            "next_cf_id" => self.next_cf_id = rest.trim().parse().ok()?,
            "cf" => {
                let mut parts = rest.splitn(3, ' ');
                let id = parts.next()?.parse().ok()?;
                let log_number = parts.next()?.parse().ok()?;
                let name = parts.next()?.to_string();
                self.column_families.push(CfRecord {
                    id,
                    log_number,
                    name,
                });
            }
            "file" => {
                let fields: Vec<&str> = rest.split_whitespace().collect();
                if fields.len() != 4 {
                    return None;
                }
                self.files.push(FileRecord {
                    cf: fields[0].parse().ok()?,
                    level: fields[1].parse().ok()?,
                    number: fields[2].parse().ok()?,
                    size: fields[3].parse().ok()?,
                });
            }
            _ => return None,
        }
        Some(())
    }

    /// Persists the manifest.
    ///
    /// Uses atomic rename (write to `.tmp`, fsync, rename). If the rename
    /// fails, as it can on Windows while the target is still cached, falls
    /// back to a direct truncate-and-write.
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            self.write_contents(&mut f)?;
            f.flush()?;
            f.sync_all()?;
        }

        if fs::rename(&tmp_path, &self.path).is_err() {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.write_contents(&mut f)?;
            f.flush()?;
            f.sync_all()?;

            let _ = fs::remove_file(&tmp_path);
        }

        if let Some(dir) = self.path.parent() {
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }

    fn write_contents(&self, f: &mut File) -> Result<()> {
        let mut out = String::new();
        out.push_str("# ShaleKV manifest\n");
        out.push_str(&format!("next_file_number {}\n", self.next_file_number));
        out.push_str(&format!("last_sequence {}\n", self.last_sequence));
        out.push_str(&format!("next_cf_id {}\n", self.next_cf_id));
        for cf in &self.column_families {
            out.push_str(&format!("cf {} {} {}\n", cf.id, cf.log_number, cf.name));
        }
        for file in &self.files {
            out.push_str(&format!(
                "file {} {} {} {}\n",
                file.cf, file.level, file.number, file.size
            ));
        }
        f.write_all(out.as_bytes())?;
        Ok(())
    }

    pub fn column_family_names(&self) -> Vec<String> {
        self.column_families.iter().map(|cf| cf.name.clone()).collect()
    }

    pub fn files_of(&self, cf: u32) -> impl Iterator<Item = &FileRecord> + '_ {
        self.files.iter().filter(move |f| f.cf == cf)
    }
}

fn bad_line(line_num: usize, line: &str) -> Error {
    Error::Corruption(format!("manifest line {line_num}: cannot parse {line:?}"))
}
