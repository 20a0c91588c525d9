//! Shared and exclusive frame buffers.
//!
//! A [`FrameBuf`] may be aliased by other owners (the queue that produced
//! it, a peer still holding it). Before a frame crosses into a different
//! ownership domain it must be made exclusive: a sole owner unwraps in
//! place, a shared buffer is duplicated through the [`FrameAlloc`] seam and
//! the original reference is released. `make_exclusive` consumes the
//! `FrameBuf`, so the original is released exactly once on every path,
//! including duplication failure.

use std::sync::Arc;

use crate::error::AllocError;

/// Fallible frame duplication.
///
/// Duplication sits behind a trait so memory pressure can be modeled: the
/// production allocator never fails, test allocators may.
pub trait FrameAlloc: Send + Sync {
    /// Duplicate `data` into a freshly owned buffer.
    fn clone_frame(&self, data: &[u8]) -> Result<Vec<u8>, AllocError>;
}

/// Production allocator. Infallible.
#[derive(Debug, Default)]
pub struct SystemAlloc;

impl FrameAlloc for SystemAlloc {
    fn clone_frame(&self, data: &[u8]) -> Result<Vec<u8>, AllocError> {
        Ok(data.to_vec())
    }
}

/// A frame buffer that may be shared with other owners.
///
/// Aliasing is explicit via [`FrameBuf::share`]; there is no `Clone` impl.
#[derive(Debug)]
pub struct FrameBuf {
    data: Arc<Vec<u8>>,
}

impl FrameBuf {
    /// Wrap an owned byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame is empty. Empty frames are rejected before
    /// classification; the control byte of an empty frame does not exist.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The frame contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// The leading control byte, if any.
    pub fn control_byte(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Create another reference to the same underlying buffer.
    pub fn share(&self) -> FrameBuf {
        FrameBuf {
            data: Arc::clone(&self.data),
        }
    }

    /// Whether another owner currently holds this buffer.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Number of owners of the underlying buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// Obtain exclusive ownership of the frame contents.
    ///
    /// A sole owner is unwrapped without copying. A shared buffer is
    /// duplicated through `alloc`; whether duplication succeeds or fails,
    /// this reference to the original is released when `self` is consumed.
    pub fn make_exclusive(self, alloc: &dyn FrameAlloc) -> Result<ExclusiveFrame, AllocError> {
        match Arc::try_unwrap(self.data) {
            Ok(data) => Ok(ExclusiveFrame { data }),
            Err(shared) => {
                let data = alloc.clone_frame(&shared)?;
                Ok(ExclusiveFrame { data })
            }
        }
    }
}

/// An exclusively-owned frame.
///
/// Exactly one owner may read, mutate, or release it; this is the only form
/// handed across the kernel/user boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusiveFrame {
    data: Vec<u8>,
}

impl ExclusiveFrame {
    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The frame contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// The leading control byte, if any.
    pub fn control_byte(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Unwrap into the underlying bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Re-wrap as a (sole-owner) shareable buffer.
    pub fn into_shared(self) -> FrameBuf {
        FrameBuf::new(self.data)
    }
}

impl From<Vec<u8>> for ExclusiveFrame {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Allocator that always reports memory pressure.
    struct FailingAlloc;

    impl FrameAlloc for FailingAlloc {
        fn clone_frame(&self, data: &[u8]) -> Result<Vec<u8>, AllocError> {
            Err(AllocError { len: data.len() })
        }
    }

    #[test]
    fn test_sole_owner_unwraps_without_copy() {
        let frame = FrameBuf::new(vec![0x00, 0xAA, 0xBB]);
        assert!(!frame.is_shared());

        let exclusive = frame.make_exclusive(&SystemAlloc).unwrap();
        assert_eq!(exclusive.as_slice(), &[0x00, 0xAA, 0xBB]);
    }

    #[test]
    fn test_shared_buffer_is_cloned_and_original_released() {
        let original = FrameBuf::new(vec![0x00, 0x01]);
        let alias = original.share();
        assert_eq!(original.ref_count(), 2);

        let exclusive = alias.make_exclusive(&SystemAlloc).unwrap();
        assert_eq!(exclusive.as_slice(), original.as_slice());

        // The alias's reference was released exactly once: the original is
        // sole owner again.
        assert_eq!(original.ref_count(), 1);
        assert!(!original.is_shared());
    }

    #[test]
    fn test_clone_failure_still_releases_original() {
        let original = FrameBuf::new(vec![0x00; 16]);
        let alias = original.share();
        assert_eq!(original.ref_count(), 2);

        let err = alias.make_exclusive(&FailingAlloc).unwrap_err();
        assert_eq!(err.len, 16);
        assert_eq!(original.ref_count(), 1);
    }

    #[test]
    fn test_sole_owner_never_consults_allocator() {
        // FailingAlloc would error, but a sole owner unwraps in place.
        let frame = FrameBuf::new(vec![0x02]);
        let exclusive = frame.make_exclusive(&FailingAlloc).unwrap();
        assert_eq!(exclusive.control_byte(), Some(0x02));
    }

    #[test]
    fn test_empty_frame_has_no_control_byte() {
        let frame = FrameBuf::new(Vec::new());
        assert!(frame.is_empty());
        assert_eq!(frame.control_byte(), None);
    }
}
