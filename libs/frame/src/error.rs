//! Error types for frame handling.

use thiserror::Error;

/// Failure to duplicate a frame buffer.
///
/// Raised by a [`FrameAlloc`](crate::FrameAlloc) implementation when it
/// cannot provide memory for a copy. Callers treat this as a recoverable
/// per-frame condition: the frame is dropped and counted, processing
/// continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("frame clone of {len} bytes failed: out of buffer memory")]
pub struct AllocError {
    /// Length of the buffer that could not be duplicated.
    pub len: usize,
}
