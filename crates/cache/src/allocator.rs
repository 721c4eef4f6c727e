use std::sync::Arc;

/// Source of the buffers that hold cached block contents.
///
/// The cache asks for a buffer of exactly `size` bytes on insert, copies the
/// block into it, and hands the buffer back through `deallocate` once the
/// entry is evicted and every handle to it has been dropped.
pub trait MemoryAllocator: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a zeroed buffer with `len() == size`.
    fn allocate(&self, size: usize) -> Vec<u8>;

    fn deallocate(&self, buf: Vec<u8>);
}

/// Global heap allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl MemoryAllocator for SystemAllocator {
    fn name(&self) -> &str {
        "SystemAllocator"
    }

    fn allocate(&self, size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    fn deallocate(&self, buf: Vec<u8>) {
        drop(buf);
    }
}

/// Owner of an allocator-provided buffer; returns it on drop.
pub(crate) struct AllocatedBuf {
    buf: Option<Vec<u8>>,
    allocator: Arc<dyn MemoryAllocator>,
}

impl AllocatedBuf {
    pub(crate) fn copy_from(allocator: &Arc<dyn MemoryAllocator>, data: &[u8]) -> Self {
        let mut buf = allocator.allocate(data.len());
        buf.resize(data.len(), 0);
        buf.copy_from_slice(data);
        Self {
            buf: Some(buf),
            allocator: Arc::clone(allocator),
        }
    }
}

impl AsRef<[u8]> for AllocatedBuf {
    fn as_ref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl Drop for AllocatedBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.allocator.deallocate(buf);
        }
    }
}
