//! Optimistic transactions.
//!
//! A [`Transaction`] buffers its writes in a private overlay and remembers,
//! for every key read through `get_for_update`, the newest version it
//! observed. Nothing is locked while the transaction runs.
//! At commit, under the database write mutex, each remembered key is looked
//! up again: if any has a newer version the commit fails with `Conflict` and
//! the transaction stays active. Otherwise the overlay is applied as a
//! single batch.

use std::collections::{BTreeMap, HashMap};
use std::iter::Peekable;
use std::ops::Bound;
use std::path::Path;

use bytes::Bytes;
use config::{Options, ReadOptions, TransactionOptions, WriteOptions};
use memtable::MAX_SEQUENCE;
use tracing::debug;

use crate::batch::WriteBatch;
use crate::column_family::{ColumnFamilyDescriptor, ColumnFamilyHandle, DEFAULT_CF_ID};
use crate::error::{Error, Result};
use crate::iterator::DbIterator;
use crate::read::KeyState;
use crate::slice::PinnableSlice;
use crate::snapshot::Snapshot;
use crate::write::WriteValidator;
use crate::{Db, DbInner};

/// A database that hands out optimistic transactions. Plain reads and
/// writes go through [`OptimisticTransactionDb::base_db`].
#[derive(Debug)]
pub struct OptimisticTransactionDb {
    db: Db,
}

impl OptimisticTransactionDb {
    pub fn open<P: AsRef<Path>>(path: P, opts: &Options) -> Result<Self> {
        Ok(Self {
            db: Db::open(path, opts)?,
        })
    }

    pub fn open_cf<P: AsRef<Path>>(
        path: P,
        opts: &Options,
        descriptors: &[ColumnFamilyDescriptor],
    ) -> Result<Self> {
        Ok(Self {
            db: Db::open_cf(path, opts, descriptors)?,
        })
    }

    pub fn base_db(&self) -> &Db {
        &self.db
    }

    pub fn begin_transaction(
        &self,
        write_options: &WriteOptions,
        txn_options: &TransactionOptions,
    ) -> Transaction<'_> {
        let snapshot = txn_options.set_snapshot.then(|| self.db.snapshot());
        Transaction {
            db: &self.db,
            write_options: *write_options,
            snapshot,
            overlay: BTreeMap::new(),
            read_set: HashMap::new(),
            state: TransactionState::Active,
        }
    }

    pub fn close(self) -> Result<()> {
        self.db.close()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

type TxnKey = (u32, Vec<u8>);

/// One optimistic transaction.
///
/// Reads see the transaction's own writes first, then the database as of
/// the transaction's snapshot (or the latest state when it has none). Once
/// committed or rolled back, reads go straight to the database and writes
/// fail with `InvalidArgument`.
pub struct Transaction<'db> {
    db: &'db Db,
    write_options: WriteOptions,
    snapshot: Option<Snapshot>,
    /// `None` marks a buffered delete.
    overlay: BTreeMap<TxnKey, Option<Vec<u8>>>,
    /// First observed version per key.
    read_set: HashMap<TxnKey, KeyState>,
    state: TransactionState,
}

impl<'db> Transaction<'db> {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The snapshot reads are served from, if one was taken at begin.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        Err(Error::InvalidArgument(format!(
            "transaction is {:?}",
            self.state
        )))
    }

    fn default_cf(&self) -> Result<ColumnFamilyHandle> {
        self.db.default_column_family()
    }

    /// `ro` with the transaction snapshot filled in unless it names one.
    fn effective_read_options(&self, ro: &ReadOptions) -> ReadOptions {
        let mut ro = ro.clone();
        if ro.snapshot.is_none() {
            ro.snapshot = self.snapshot.as_ref().map(Snapshot::sequence);
        }
        ro
    }

    pub fn get<K: AsRef<[u8]>>(&self, ro: &ReadOptions, key: K) -> Result<Option<Vec<u8>>> {
        let cf = self.default_cf()?;
        self.get_cf(ro, &cf, key)
    }

    pub fn get_cf<K: AsRef<[u8]>>(
        &self,
        ro: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: K,
    ) -> Result<Option<Vec<u8>>> {
        if !self.is_active() {
            return self.db.get_cf_opt(ro, cf, key);
        }
        let cf_data = self.db.inner.resolve(cf)?;
        if let Some(buffered) = self.overlay.get(&(cf_data.id, key.as_ref().to_vec())) {
            return Ok(buffered.clone());
        }
        let ro = self.effective_read_options(ro);
        Ok(self
            .db
            .inner
            .get_impl(&ro, &cf_data, key.as_ref(), false)?
            .map(|v| v.to_vec()))
    }

    /// Reads `key` and adds it to the set validated at commit.
    pub fn get_for_update<K: AsRef<[u8]>>(&mut self, ro: &ReadOptions, key: K) -> Result<Option<Vec<u8>>> {
        let cf = self.default_cf()?;
        self.get_for_update_cf(ro, &cf, key)
    }

    pub fn get_for_update_cf<K: AsRef<[u8]>>(
        &mut self,
        ro: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: K,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read_for_update(ro, cf, key.as_ref(), false)?
            .map(|v| v.to_vec()))
    }

    /// Like [`Transaction::get_for_update`], returning a [`PinnableSlice`].
    pub fn get_pinned_for_update<K: AsRef<[u8]>>(
        &mut self,
        ro: &ReadOptions,
        key: K,
    ) -> Result<Option<PinnableSlice>> {
        let cf = self.default_cf()?;
        self.read_for_update(ro, &cf, key.as_ref(), true)
    }

    pub fn get_pinned_for_update_cf<K: AsRef<[u8]>>(
        &mut self,
        ro: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: K,
    ) -> Result<Option<PinnableSlice>> {
        self.read_for_update(ro, cf, key.as_ref(), true)
    }

    fn read_for_update(
        &mut self,
        ro: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        pin: bool,
    ) -> Result<Option<PinnableSlice>> {
        if !self.is_active() {
            return self.db.get_pinned_cf_opt(ro, cf, key);
        }
        let cf_data = self.db.inner.resolve(cf)?;
        let txn_key = (cf_data.id, key.to_vec());

        // value and observed state come from the same view
        let ro = self.effective_read_options(ro);
        let (sv, seq) = self.db.inner.read_view(&ro, &cf_data);
        if !self.read_set.contains_key(&txn_key) {
            let observed = DbInner::key_state_in(&sv, key, seq)?;
            self.read_set.insert(txn_key.clone(), observed);
        }

        if let Some(buffered) = self.overlay.get(&txn_key) {
            return Ok(buffered
                .as_ref()
                .map(|v| PinnableSlice::new(Bytes::copy_from_slice(v), None)));
        }
        self.db.inner.get_from(&sv, &cf_data, &ro, seq, key, pin)
    }

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) -> Result<()> {
        self.ensure_active()?;
        self.overlay
            .insert((DEFAULT_CF_ID, key.as_ref().to_vec()), Some(value.as_ref().to_vec()));
        Ok(())
    }

    pub fn put_cf<K: AsRef<[u8]>, V: AsRef<[u8]>>(
        &mut self,
        cf: &ColumnFamilyHandle,
        key: K,
        value: V,
    ) -> Result<()> {
        self.ensure_active()?;
        let cf = self.db.inner.resolve(cf)?;
        self.overlay
            .insert((cf.id, key.as_ref().to_vec()), Some(value.as_ref().to_vec()));
        Ok(())
    }

    pub fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> Result<()> {
        self.ensure_active()?;
        self.overlay.insert((DEFAULT_CF_ID, key.as_ref().to_vec()), None);
        Ok(())
    }

    pub fn delete_cf<K: AsRef<[u8]>>(&mut self, cf: &ColumnFamilyHandle, key: K) -> Result<()> {
        self.ensure_active()?;
        let cf = self.db.inner.resolve(cf)?;
        self.overlay.insert((cf.id, key.as_ref().to_vec()), None);
        Ok(())
    }

    /// Iterator over the default column family with this transaction's
    /// writes applied on top.
    pub fn iter(&self, ro: &ReadOptions) -> Result<TransactionIterator> {
        let cf = self.default_cf()?;
        self.iter_cf(ro, &cf)
    }

    pub fn iter_cf(&self, ro: &ReadOptions, cf: &ColumnFamilyHandle) -> Result<TransactionIterator> {
        if !self.is_active() {
            return Ok(TransactionIterator::new(self.db.new_iterator_cf(ro, cf)?, Vec::new()));
        }
        let cf_data = self.db.inner.resolve(cf)?;
        let ro = self.effective_read_options(ro);
        let base = self.db.new_iterator_cf(&ro, cf)?;

        let lower = (cf_data.id, ro.iterate_lower_bound().unwrap_or_default().to_vec());
        let overlay: Vec<(Vec<u8>, Option<Vec<u8>>)> = self
            .overlay
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(|((id, key), _)| {
                *id == cf_data.id
                    && ro
                        .iterate_upper_bound()
                        .map_or(true, |upper| key.as_slice() < upper)
            })
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect();
        Ok(TransactionIterator::new(base, overlay))
    }

    /// Validates the read set and applies the buffered writes atomically.
    ///
    /// # Errors
    ///
    /// `Conflict` when a key read with `get_for_update` changed since it
    /// was read; the transaction stays active and may be retried or rolled
    /// back. `InvalidArgument` when the transaction is no longer active.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;

        let mut batch = WriteBatch::new();
        for ((cf, key), value) in &self.overlay {
            match value {
                Some(v) => batch.push_put(*cf, key, v),
                None => batch.push_delete(*cf, key),
            }
        }

        let read_set = &self.read_set;
        let validate: WriteValidator<'_> = &|db: &DbInner| -> Result<()> {
            for ((cf_id, key), &observed) in read_set {
                let cf = db
                    .cf_by_id(*cf_id)
                    .filter(|cf| !cf.is_dropped())
                    .ok_or_else(|| {
                        Error::Conflict(format!("column family {cf_id} was dropped"))
                    })?;
                let current = db.latest_key_state(&cf, key, MAX_SEQUENCE)?;
                if !current.unchanged_since(observed) {
                    return Err(Error::Conflict(format!(
                        "key {:?} was written at sequence {} after being read at {}",
                        String::from_utf8_lossy(key),
                        current.sequence(),
                        observed.sequence()
                    )));
                }
            }
            Ok(())
        };

        let writes = batch.len();
        let seq = self
            .db
            .inner
            .write_impl(&self.write_options, batch, Some(validate))?;
        debug!(
            writes,
            reads = self.read_set.len(),
            sequence = seq,
            "transaction committed"
        );
        self.finish(TransactionState::Committed);
        Ok(())
    }

    /// Discards the buffered writes and the read set.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.finish(TransactionState::RolledBack);
        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.overlay.clear();
        self.read_set.clear();
        self.snapshot = None;
        self.state = state;
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("snapshot", &self.snapshot.as_ref().map(Snapshot::sequence))
            .field("writes", &self.overlay.len())
            .field("reads", &self.read_set.len())
            .finish()
    }
}

/// A [`DbIterator`] with a transaction's buffered writes merged in. Buffered
/// values replace stored ones and buffered deletes hide them.
pub struct TransactionIterator {
    base: Peekable<DbIterator>,
    overlay: Peekable<std::vec::IntoIter<(Vec<u8>, Option<Vec<u8>>)>>,
}

enum Step {
    Base,
    Overlay,
    /// Both sides hold the same key; the overlay wins.
    Shadow,
}

impl TransactionIterator {
    fn new(base: DbIterator, overlay: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> Self {
        Self {
            base: base.peekable(),
            overlay: overlay.into_iter().peekable(),
        }
    }
}

impl Iterator for TransactionIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = match (self.base.peek(), self.overlay.peek()) {
                (None, None) => return None,
                (Some(Err(_)), _) => Step::Base,
                (Some(_), None) => Step::Base,
                (None, Some(_)) => Step::Overlay,
                (Some(Ok((base_key, _))), Some((key, _))) => {
                    if key < base_key {
                        Step::Overlay
                    } else if key == base_key {
                        Step::Shadow
                    } else {
                        Step::Base
                    }
                }
            };

            match step {
                Step::Base => return self.base.next(),
                Step::Shadow | Step::Overlay => {
                    if matches!(step, Step::Shadow) {
                        self.base.next();
                    }
                    if let Some((key, Some(value))) = self.overlay.next() {
                        return Some(Ok((key, value)));
                    }
                }
            }
        }
    }
}
