/*!
 * Shared window over the caller's destination buffer
 */

use std::sync::Arc;

/// The caller's host buffer, shared by every worker of one aggregate
/// request.
///
/// The assigner partitions `[0, len)` into non-overlapping task regions, so
/// concurrent workers always write through disjoint sub-slices and no
/// locking is involved. The caller guarantees the allocation outlives the
/// request (it must not free or read the buffer until the covering
/// sub-request has completed).
#[derive(Debug)]
pub struct DstBuffer {
    ptr: *mut u8,
    len: usize,
}

// Writers touch disjoint regions only; see the struct invariant.
unsafe impl Send for DstBuffer {}
unsafe impl Sync for DstBuffer {}

impl DstBuffer {
    /// Wrap a raw caller buffer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` writable bytes that stay valid until every
    /// completion event of the request referencing this buffer has been
    /// delivered (or the streamer is dropped).
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Arc<Self> {
        Arc::new(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A writable region of the buffer.
    ///
    /// Panics if the region falls outside the buffer; region disjointness
    /// across concurrent callers is the assigner's invariant.
    pub(crate) fn region(&self, offset: usize, len: usize) -> DstRegion {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "destination region {}+{} overflows buffer of {} bytes",
            offset,
            len,
            self.len
        );
        DstRegion {
            ptr: unsafe { self.ptr.add(offset) },
            len,
        }
    }
}

/// One disjoint writable region of a `DstBuffer`, handed to a single
/// worker or to the backend for a single in-flight read.
#[derive(Debug, Clone, Copy)]
pub struct DstRegion {
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for DstRegion {}
unsafe impl Sync for DstRegion {}

impl DstRegion {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Narrow this region to `[offset, offset + len)`.
    pub(crate) fn subregion(&self, offset: usize, len: usize) -> DstRegion {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "subregion {}+{} overflows region of {} bytes",
            offset,
            len,
            self.len
        );
        DstRegion {
            ptr: unsafe { self.ptr.add(offset) },
            len,
        }
    }

    /// View the region as a mutable byte slice.
    ///
    /// The caller must be the sole writer of this region for the duration
    /// of the borrow; the assigner's partitioning provides that.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn as_mut_slice(&self) -> &mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// Copy `data` into the head of the region.
    pub(crate) fn copy_from(&self, data: &[u8]) {
        assert!(data.len() <= self.len, "write of {} bytes into region of {}", data.len(), self.len);
        self.as_mut_slice()[..data.len()].copy_from_slice(data);
    }
}
