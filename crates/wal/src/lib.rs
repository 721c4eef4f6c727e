//! # WAL - Write-Ahead Log
//!
//! Provides crash-safe durability for ShaleKV.
//!
//! Every write batch is serialized into one binary record and appended to
//! the current WAL segment **before** it is applied to any memtable. On
//! restart the segments are replayed in order to rebuild the memtables that
//! had not been flushed, so a batch is either fully recovered or not at all
//! (even when it spans several column families).
//!
//! ## Segments
//!
//! The log is a sequence of segment files named `{number:020}.log` inside the
//! database directory. The engine starts a new segment each time it switches
//! memtables, and deletes a segment once every column family has flushed the
//! data it contains.
//!
//! ## Frame Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! `record_len` includes the 4-byte CRC but **not** itself. The body layout
//! is documented on [`WalRecord::encode_into`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use config::{SyncPolicy, WalRecoveryMode};
//! use wal::{BatchOp, WalReader, WalRecord, WalWriter};
//!
//! let mut w = WalWriter::create("000001.log", SyncPolicy::Always).unwrap();
//! w.append(&WalRecord::new(1, vec![BatchOp::Put {
//!     cf: 0,
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }]))
//! .unwrap();
//! drop(w);
//!
//! for rec in WalReader::open("000001.log", WalRecoveryMode::Strict).unwrap() {
//!     println!("{:?}", rec.unwrap());
//! }
//! ```

use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use config::{SyncPolicy, WalRecoveryMode};
use thiserror::Error;
use tracing::warn;

mod record;

pub use record::{BatchOp, WalRecord};

/// Largest accepted `record_len`.
pub const MAX_RECORD_SIZE: u32 = 128 * 1024 * 1024;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation, had an impossible length, or did not
    /// parse.
    #[error("corrupt wal record at offset {offset}")]
    Corrupt { offset: u64 },

    #[error("wal record of {0} bytes exceeds the size limit")]
    TooLarge(usize),
}

/// File name of WAL segment `number`.
pub fn segment_file_name(number: u64) -> String {
    format!("{:020}.log", number)
}

/// Inverse of [`segment_file_name`].
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".log")?;
    if stem.len() != 20 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Every WAL segment in `dir`, ordered by segment number.
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, WalError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(n) = entry.file_name().to_str().and_then(parse_segment_file_name) {
            out.push((n, entry.path()));
        }
    }
    out.sort_by_key(|(n, _)| *n);
    Ok(out)
}

/// Storage a [`WalWriter`] appends to.
pub trait LogFile: Write + Send {
    fn sync_data(&mut self) -> io::Result<()>;

    /// Shrinks the file to `len` bytes. Later writes continue from there.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl<F: LogFile + ?Sized> LogFile for Box<F> {
    fn sync_data(&mut self) -> io::Result<()> {
        (**self).sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        (**self).truncate(len)
    }
}

/// Append-only writer for one segment.
///
/// Records are serialized into a reusable buffer, checksummed, and written
/// with a single `write_all`. Under [`SyncPolicy::Always`] every append is
/// followed by `sync_data`. A frame whose write or sync fails is cut off
/// again, so the segment never holds a partial frame followed by more data.
pub struct WalWriter<F: LogFile = File> {
    file: F,
    path: PathBuf,
    sync: SyncPolicy,
    position: u64,
    buf: Vec<u8>,
}

impl WalWriter<File> {
    /// Opens (or creates) a segment in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: SyncPolicy) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let position = file.metadata()?.len();
        Ok(Self::with_file(file, path, sync, position))
    }
}

impl<F: LogFile> WalWriter<F> {
    /// Wraps `file`, which already holds `position` bytes of segment `path`.
    pub fn with_file(file: F, path: PathBuf, sync: SyncPolicy, position: u64) -> Self {
        Self {
            file,
            path,
            sync,
            position,
            buf: Vec::with_capacity(256),
        }
    }

    /// Same writer over a boxed file.
    pub fn boxed(self) -> WalWriter<Box<dyn LogFile>>
    where
        F: 'static,
    {
        WalWriter {
            file: Box::new(self.file),
            path: self.path,
            sync: self.sync,
            position: self.position,
            buf: self.buf,
        }
    }

    /// Appends `record` and returns the segment offset just past it.
    pub fn append(&mut self, record: &WalRecord) -> Result<u64, WalError> {
        self.buf.clear();
        // frame header placeholder: record_len + crc
        self.buf.extend_from_slice(&[0u8; 8]);
        record.encode_into(&mut self.buf)?;
        self.write_frame()
    }

    /// Appends an already encoded record body.
    pub fn append_body(&mut self, body: &[u8]) -> Result<u64, WalError> {
        self.buf.clear();
        self.buf.extend_from_slice(&[0u8; 8]);
        self.buf.extend_from_slice(body);
        self.write_frame()
    }

    fn write_frame(&mut self) -> Result<u64, WalError> {
        let body = &self.buf[8..];
        let record_len = body.len() as u64 + 4;
        if record_len > MAX_RECORD_SIZE as u64 {
            return Err(WalError::TooLarge(body.len()));
        }

        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        self.buf[0..4].copy_from_slice(&(record_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        if let Err(e) = self.write_buffer() {
            if let Err(cut) = self.file.truncate(self.position) {
                warn!(
                    path = %self.path.display(),
                    error = %cut,
                    "failed to cut off a partially written WAL frame"
                );
            }
            return Err(e.into());
        }
        self.position += self.buf.len() as u64;
        Ok(self.position)
    }

    fn write_buffer(&mut self) -> io::Result<()> {
        self.file.write_all(&self.buf)?;
        if self.sync == SyncPolicy::Always {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Forces appended data to stable storage.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Drops everything past `position`, e.g. a record whose sync failed.
    pub fn truncate(&mut self, position: u64) -> Result<(), WalError> {
        self.file.truncate(position)?;
        self.position = self.position.min(position);
        Ok(())
    }

    /// Bytes in the segment, including records appended by earlier writers.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lazy, sequential reader over one segment.
///
/// Yields each valid record in order. Every frame's CRC is verified before
/// the body is parsed. What happens on damage depends on the
/// [`WalRecoveryMode`]:
///
/// - `TolerateCorruptedTail`: a truncated or corrupt record that is followed
///   only by end-of-file (or zero padding) ends the iteration cleanly with a
///   warning. Damage followed by further data is still `Corrupt`.
/// - `Strict`: any damage is `Corrupt`.
///
/// After yielding an error the iterator is exhausted.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
    mode: WalRecoveryMode,
    offset: u64,
    body: Vec<u8>,
    done: bool,
}

impl WalReader<File> {
    pub fn open<P: AsRef<Path>>(path: P, mode: WalRecoveryMode) -> Result<Self, WalError> {
        let f = File::open(path)?;
        Ok(Self::from_reader(f, mode))
    }
}

enum Damage {
    Truncated,
    Invalid,
}

enum FrameError {
    Damaged(Damage),
    Io(io::Error),
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        FrameError::Io(e)
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor (e.g. `Cursor<Vec<u8>>`).
    pub fn from_reader(reader: R, mode: WalRecoveryMode) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
            mode,
            offset: 0,
            body: Vec::with_capacity(256),
            done: false,
        }
    }

    /// Offset just past the last record returned.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_frame(&mut self) -> Result<Option<WalRecord>, FrameError> {
        let mut header = [0u8; 8];
        let n = read_full(&mut self.rdr, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < header.len() {
            return Err(FrameError::Damaged(Damage::Truncated));
        }
        let mut hr = &header[..];
        let record_len = hr.read_u32::<LittleEndian>()?;
        let crc = hr.read_u32::<LittleEndian>()?;
        if record_len <= 4 || record_len > MAX_RECORD_SIZE {
            return Err(FrameError::Damaged(Damage::Invalid));
        }

        let body_len = (record_len - 4) as usize;
        self.body.clear();
        self.body.resize(body_len, 0);
        match self.rdr.read_exact(&mut self.body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::Damaged(Damage::Truncated))
            }
            Err(e) => return Err(e.into()),
        }

        let mut hasher = Crc32::new();
        hasher.update(&self.body);
        if hasher.finalize() != crc {
            return Err(FrameError::Damaged(Damage::Invalid));
        }
        let record = WalRecord::decode(&self.body, self.offset)
            .map_err(|_| FrameError::Damaged(Damage::Invalid))?;
        self.offset += 8 + body_len as u64;
        Ok(Some(record))
    }

    fn only_padding_remains(&mut self) -> Result<bool, WalError> {
        let mut rest = Vec::new();
        self.rdr.read_to_end(&mut rest)?;
        Ok(rest.iter().all(|b| *b == 0))
    }
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<R: Read> Iterator for WalReader<R> {
    type Item = Result<WalRecord, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(FrameError::Io(e)) => {
                self.done = true;
                Some(Err(e.into()))
            }
            Err(FrameError::Damaged(damage)) => {
                self.done = true;
                let offset = self.offset;
                if self.mode == WalRecoveryMode::Strict {
                    return Some(Err(WalError::Corrupt { offset }));
                }
                match self.only_padding_remains() {
                    Ok(true) => {
                        let kind = match damage {
                            Damage::Truncated => "truncated",
                            Damage::Invalid => "corrupt",
                        };
                        warn!(offset, kind, "ignoring damaged wal tail");
                        None
                    }
                    Ok(false) => Some(Err(WalError::Corrupt { offset })),
                    Err(e) => Some(Err(e)),
                }
            }
        }
    }
}
