use std::fmt;
use std::ops::Deref;

use bytes::Bytes;
use cache::CacheHandle;

/// A value returned by [`Db::get_pinned_cf`](crate::Db::get_pinned_cf).
///
/// When the value was served from a cached table block the slice shares the
/// block's bytes and keeps the cache entry pinned until it is dropped, so no
/// copy is made and the block cannot be evicted underneath the caller. Values
/// that came from a memtable, or that were produced by a merge, own their
/// bytes and pin nothing.
pub struct PinnableSlice {
    data: Bytes,
    pin: Option<CacheHandle>,
}

impl PinnableSlice {
    pub(crate) fn new(data: Bytes, pin: Option<CacheHandle>) -> Self {
        Self { data, pin }
    }

    /// `true` while this slice holds a block cache pin.
    pub fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }

    /// Drops the cache pin early, keeping the bytes.
    pub fn reset_pin(&mut self) {
        self.pin = None;
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl Deref for PinnableSlice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for PinnableSlice {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl PartialEq<[u8]> for PinnableSlice {
    fn eq(&self, other: &[u8]) -> bool {
        self.data[..] == *other
    }
}

impl fmt::Debug for PinnableSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnableSlice")
            .field("len", &self.data.len())
            .field("pinned", &self.pin.is_some())
            .finish()
    }
}
