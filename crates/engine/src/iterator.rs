//! Forward iteration over the live keys of one column family.

use std::sync::Arc;

use bytes::Bytes;
use config::{MergeOperator, ReadOptions};
use memtable::{InternalKey, ValueType, MAX_SEQUENCE};
use sstable::{KvIter, MergeIterator};

use crate::column_family::SuperVersion;
use crate::error::{Error, Result};
use crate::version::FileMetaData;

/// Iterator over `(key, value)` pairs in ascending key order as of a fixed
/// sequence number.
///
/// Holds the super version it was created from, so memtables and tables it
/// reads stay alive however long iteration takes. Each key appears once,
/// resolved to its newest visible version; deleted keys are skipped and
/// merge operands are applied. Keys outside the iterate bounds of the read
/// options are never returned.
///
/// After an error the iterator is exhausted until it is re-positioned.
pub struct DbIterator {
    sv: Arc<SuperVersion>,
    ro: ReadOptions,
    seq: u64,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    input: Option<MergeIterator>,
}

impl DbIterator {
    pub(crate) fn new(
        sv: Arc<SuperVersion>,
        ro: &ReadOptions,
        seq: u64,
        merge_operator: Option<Arc<dyn MergeOperator>>,
    ) -> Result<Self> {
        let mut it = Self {
            sv,
            ro: ro.clone(),
            seq,
            merge_operator,
            input: None,
        };
        it.seek_to_first()?;
        Ok(it)
    }

    /// Sequence number this iterator reads at.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Re-positions at the first key, or at the lower bound if one is set.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.rebuild(None)
    }

    /// Re-positions at the first key `>= target`.
    pub fn seek<K: AsRef<[u8]>>(&mut self, target: K) -> Result<()> {
        self.rebuild(Some(target.as_ref()))
    }

    fn rebuild(&mut self, target: Option<&[u8]>) -> Result<()> {
        self.input = None;
        let start: Option<Vec<u8>> = match (target, self.ro.iterate_lower_bound()) {
            (Some(t), Some(l)) => Some(t.max(l).to_vec()),
            (Some(t), None) => Some(t.to_vec()),
            (None, Some(l)) => Some(l.to_vec()),
            (None, None) => None,
        };
        let upper: Option<Vec<u8>> = self.ro.iterate_upper_bound().map(<[u8]>::to_vec);
        let seek_key = start.as_deref().map(|s| InternalKey::seek_key(s, MAX_SEQUENCE));

        let in_range = |f: &FileMetaData| {
            start.as_deref().map_or(true, |s| f.largest_user_key() >= s)
                && upper.as_deref().map_or(true, |u| f.smallest_user_key() < u)
        };

        let mut sources: Vec<KvIter> = Vec::new();
        for m in self.sv.memtables() {
            let mut it = m.mem.iter();
            if let Some(k) = &seek_key {
                it.seek(k);
            }
            let upper = upper.clone();
            sources.push(Box::new(
                it.take_while(move |(k, _)| upper.as_deref().map_or(true, |u| &k.user_key[..] < u))
                    .map(Ok),
            ));
        }

        let version = &self.sv.version;
        for f in version.files(0).iter().filter(|f| in_range(f)) {
            let mut it = f.table.iter(&self.ro)?;
            if let Some(k) = &seek_key {
                it.seek(k)?;
            }
            sources.push(Box::new(it));
        }
        for level in 1..version.num_levels() {
            let files: Vec<Arc<FileMetaData>> = version
                .files(level)
                .iter()
                .filter(|f| in_range(f))
                .cloned()
                .collect();
            if !files.is_empty() {
                sources.push(level_iter(files, self.ro.clone(), seek_key.clone()));
            }
        }

        self.input = Some(MergeIterator::new(sources)?);
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let input = match self.input.as_mut() {
            Some(input) => input,
            None => return Ok(None),
        };
        loop {
            let (key, value) = match input.next() {
                Some(entry) => entry?,
                None => return Ok(None),
            };
            if self
                .ro
                .iterate_upper_bound()
                .is_some_and(|upper| &key.user_key[..] >= upper)
            {
                return Ok(None);
            }
            if key.seq > self.seq {
                continue;
            }

            let user_key = key.user_key;
            let resolved = match key.vtype {
                ValueType::Deletion => None,
                ValueType::Value => Some(value.to_vec()),
                ValueType::Merge => {
                    let mut operands: Vec<Bytes> = vec![value];
                    let mut base: Option<Bytes> = None;
                    while input.peek_key().is_some_and(|k| k.user_key == user_key) {
                        let (k, v) = match input.next() {
                            Some(entry) => entry?,
                            None => break,
                        };
                        match k.vtype {
                            ValueType::Merge => operands.push(v),
                            ValueType::Value => {
                                base = Some(v);
                                break;
                            }
                            ValueType::Deletion => break,
                        }
                    }
                    let op = self.merge_operator.as_ref().ok_or_else(|| {
                        Error::InvalidArgument(
                            "merge operands found but no merge operator is set".to_string(),
                        )
                    })?;
                    let ops: Vec<&[u8]> = operands.iter().rev().map(|b| &b[..]).collect();
                    Some(op.full_merge(&user_key, base.as_deref(), &ops).ok_or_else(|| {
                        Error::Corruption(format!("merge operator {} failed", op.name()))
                    })?)
                }
            };

            // older versions of this key are shadowed
            while input.peek_key().is_some_and(|k| k.user_key == user_key) {
                if let Some(entry) = input.next() {
                    entry?;
                }
            }

            if let Some(value) = resolved {
                return Ok(Some((user_key.to_vec(), value)));
            }
        }
    }
}

/// Lazily concatenates the tables of one sorted level, opening each only
/// when iteration reaches it.
fn level_iter(files: Vec<Arc<FileMetaData>>, ro: ReadOptions, seek_key: Option<InternalKey>) -> KvIter {
    Box::new(files.into_iter().flat_map(move |f| -> KvIter {
        let opened = f.table.iter(&ro).and_then(|mut it| {
            if let Some(k) = &seek_key {
                it.seek(k)?;
            }
            Ok(it)
        });
        match opened {
            Ok(it) => Box::new(it),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }))
}

impl Iterator for DbIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(kv)) => Some(Ok(kv)),
            Ok(None) => {
                self.input = None;
                None
            }
            Err(e) => {
                self.input = None;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for DbIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIterator")
            .field("sequence", &self.seq)
            .field("exhausted", &self.input.is_none())
            .finish()
    }
}
