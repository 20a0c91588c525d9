//! # xtap-frame
//!
//! Frame buffers and control-code classification for the xtap bridge.
//!
//! An X.25 layer-2 frame crossing the bridge is a byte buffer whose first
//! byte is a control code. This library provides:
//!
//! - [`ControlCode`]: first-byte classification of outbound frames
//! - [`FrameBuf`]: a possibly-shared frame buffer
//! - [`ExclusiveFrame`]: an exclusively-owned frame, the only form allowed
//!   to cross an ownership domain (kernel-side ⇄ user-side)
//! - [`FrameAlloc`]: the fallible duplication seam used by
//!   [`FrameBuf::make_exclusive`]
//!
//! ## Design Principles
//!
//! - A shared buffer is never mutated or handed off; it is duplicated first.
//! - Releasing the original reference happens exactly once on every path,
//!   enforced by move semantics rather than manual bookkeeping.
//! - Duplication may fail under memory pressure; that failure is ordinary
//!   and recoverable (the caller drops the frame and counts it).

mod buffer;
mod control;
mod error;

pub use buffer::{ExclusiveFrame, FrameAlloc, FrameBuf, SystemAlloc};
pub use control::ControlCode;
pub use error::AllocError;
