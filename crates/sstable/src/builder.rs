use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bloom::{BloomFilterPolicy, FilterPolicy};
use config::{CompressionType, TableOptions};
use memtable::{compare_internal_keys, InternalKey, ValueType};
use tracing::debug;

use crate::block::BlockBuilder;
use crate::error::{Result, SstError};
use crate::format::{write_block, BlockHandle, Footer, BLOCK_TRAILER_SIZE, FORMAT_VERSION};
use crate::properties::TableProperties;

/// Knobs for a single table build.
#[derive(Clone)]
pub struct TableBuilderOptions {
    pub block_size: usize,
    pub compression: CompressionType,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
}

impl TableBuilderOptions {
    pub fn from_table_options(opts: &TableOptions) -> Self {
        Self {
            block_size: opts.block_size.max(1),
            compression: opts.compression,
            filter_policy: opts
                .bloom_bits_per_key
                .map(|bits| Arc::new(BloomFilterPolicy::new(bits)) as Arc<dyn FilterPolicy>),
        }
    }
}

impl Default for TableBuilderOptions {
    fn default() -> Self {
        Self::from_table_options(&TableOptions::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Poisoned,
    Finished,
}

/// Streams sorted internal-key records into a new table file.
///
/// Records must arrive in strictly ascending internal-key order; the first
/// violation fails with [`SstError::InvalidArgument`] and poisons the
/// builder so the partial file can never be installed.
///
/// Output goes to `<path>.sst.tmp` and is fsynced, renamed into place and
/// made durable with a directory fsync by [`TableBuilder::finish`]. A builder
/// dropped without finishing removes its temporary file.
pub struct TableBuilder {
    path: PathBuf,
    tmp_path: PathBuf,
    file: Option<BufWriter<File>>,
    opts: TableBuilderOptions,
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Vec<u8>,
    filter_keys: Vec<Vec<u8>>,
    props: TableProperties,
    state: State,
}

impl TableBuilder {
    pub fn create<P: AsRef<Path>>(path: P, opts: TableBuilderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("sst.tmp");
        let raw = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let props = TableProperties {
            compression: compression_name(opts.compression).to_string(),
            filter_policy: opts
                .filter_policy
                .as_ref()
                .map(|p| p.name().to_string())
                .unwrap_or_default(),
            smallest_seq: u64::MAX,
            ..TableProperties::default()
        };
        Ok(Self {
            path,
            tmp_path,
            file: Some(BufWriter::new(raw)),
            opts,
            offset: 0,
            data_block: BlockBuilder::new(),
            index_block: BlockBuilder::new(),
            last_key: Vec::new(),
            filter_keys: Vec::new(),
            props,
            state: State::Open,
        })
    }

    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        self.check_open()?;
        let encoded = key.encode();
        if self.props.num_entries > 0
            && compare_internal_keys(&encoded, &self.last_key) != std::cmp::Ordering::Greater
        {
            self.state = State::Poisoned;
            return Err(SstError::InvalidArgument(format!(
                "key {:?}@{} added out of order",
                key.user_key, key.seq
            )));
        }

        let props = &mut self.props;
        if props.num_entries == 0 {
            props.smallest_key = encoded.clone();
        }
        props.num_entries += 1;
        match key.vtype {
            ValueType::Deletion => props.num_deletions += 1,
            ValueType::Merge => props.num_merge_operands += 1,
            ValueType::Value => {}
        }
        props.raw_key_size += encoded.len() as u64;
        props.raw_value_size += value.len() as u64;
        props.smallest_seq = props.smallest_seq.min(key.seq);
        props.largest_seq = props.largest_seq.max(key.seq);

        if self.opts.filter_policy.is_some()
            && self.filter_keys.last().map(Vec::as_slice) != Some(&key.user_key[..])
        {
            self.filter_keys.push(key.user_key.to_vec());
        }

        self.data_block.add(&encoded, value);
        self.last_key = encoded;
        if self.data_block.estimated_size() >= self.opts.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Poisoned => Err(SstError::InvalidArgument(
                "table builder is poisoned".to_string(),
            )),
            State::Finished => Err(SstError::InvalidArgument(
                "table builder already finished".to_string(),
            )),
        }
    }

    fn write_raw_block(&mut self, raw: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SstError::InvalidArgument("table file already closed".to_string()))?;
        let handle = write_block(file, self.offset, raw, compression)?;
        self.offset += handle.size + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let raw = self.data_block.finish();
        let handle = self.write_raw_block(&raw, self.opts.compression)?;
        let mut encoded = Vec::with_capacity(16);
        handle.encode_into(&mut encoded);
        self.index_block.add(&self.last_key, &encoded);
        self.props.num_data_blocks += 1;
        self.props.data_size += handle.size + BLOCK_TRAILER_SIZE as u64;
        Ok(())
    }

    /// Writes the filter, index, properties and footer, then atomically
    /// installs the file at its final path.
    ///
    /// Fails with `InvalidArgument` when no record was added.
    pub fn finish(&mut self) -> Result<TableProperties> {
        self.check_open()?;
        if self.props.num_entries == 0 {
            self.state = State::Poisoned;
            return Err(SstError::InvalidArgument(
                "refusing to write an empty table".to_string(),
            ));
        }
        self.flush_data_block()?;

        let mut filter = BlockHandle::default();
        if let Some(policy) = self.opts.filter_policy.clone() {
            let keys: Vec<&[u8]> = self.filter_keys.iter().map(Vec::as_slice).collect();
            let bits = policy.create_filter(&keys);
            filter = self.write_raw_block(&bits, CompressionType::None)?;
            self.props.filter_size = filter.size;
        }

        let index_raw = self.index_block.finish();
        let index = self.write_raw_block(&index_raw, CompressionType::None)?;
        self.props.index_size = index.size;

        self.props.largest_key = self.last_key.clone();
        let props_raw = self.props.encode();
        let properties = self.write_raw_block(&props_raw, CompressionType::None)?;

        let footer = Footer {
            filter,
            properties,
            index,
            version: FORMAT_VERSION,
        };
        let mut file = self
            .file
            .take()
            .ok_or_else(|| SstError::InvalidArgument("table file already closed".to_string()))?;
        file.write_all(&footer.encode())?;
        self.offset += footer.encode().len() as u64;

        file.flush()?;
        file.into_inner()
            .map_err(|e| SstError::Io(e.into_error()))?
            .sync_all()?;
        fs::rename(&self.tmp_path, &self.path)?;
        sync_parent_dir(&self.path);

        self.state = State::Finished;
        debug!(
            path = %self.path.display(),
            entries = self.props.num_entries,
            bytes = self.offset,
            "table written"
        );
        Ok(self.props.clone())
    }

    /// Drops the partial output.
    pub fn abandon(mut self) {
        self.discard_tmp();
    }

    fn discard_tmp(&mut self) {
        if self.state != State::Finished {
            self.file = None;
            let _ = fs::remove_file(&self.tmp_path);
            self.state = State::Finished;
        }
    }

    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    /// Bytes written so far plus the pending data block.
    pub fn estimated_file_size(&self) -> u64 {
        self.offset + self.data_block.estimated_size() as u64
    }

    /// Final size; only meaningful after [`TableBuilder::finish`].
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        self.discard_tmp();
    }
}

/// Makes a rename inside `path`'s directory durable. Errors are ignored on
/// platforms where directories cannot be opened.
pub(crate) fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

pub(crate) fn compression_name(c: CompressionType) -> &'static str {
    match c {
        CompressionType::None => "none",
        CompressionType::Lz4 => "lz4",
        CompressionType::Zstd => "zstd",
    }
}
