//! Control-channel interface.
//!
//! The control channel is the datagram-oriented, addressed endpoint a tap
//! uses to exchange frames with its user-space counterpart: outbound frames
//! are broadcast with no acknowledgment, inbound messages arrive with the
//! sender's credential attached. The transport sits behind
//! [`ChannelProvider`] so the bridge core never depends on a particular
//! one; the in-process [`loopback`] bus is the shipped implementation.

use std::sync::Arc;

use thiserror::Error;

use xtap_frame::{ExclusiveFrame, FrameBuf};
use xtap_registry::ChannelAddress;

pub mod loopback;

pub use loopback::{LoopbackBus, UserHandle};

/// Channel errors.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Another endpoint is already bound at this address.
    #[error("channel address {0} already in use")]
    AddressInUse(ChannelAddress),

    /// The channel is gone (tap closed or bus shut down).
    #[error("channel closed")]
    Closed,
}

/// Identity of a message sender.
///
/// Only the privileged local identity may write frames into a tap; this is
/// the bridge's sole admission-control check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderId(pub u32);

impl SenderId {
    /// The privileged local identity.
    pub const LOCAL: SenderId = SenderId(0);

    /// Whether this sender may write frames into a tap.
    pub fn is_privileged(&self) -> bool {
        self.0 == 0
    }
}

/// A message pending delivery from user space, credential attached.
#[derive(Debug)]
pub struct InboundMessage {
    pub payload: FrameBuf,
    pub sender: SenderId,
}

/// Bound kernel-side channel endpoint.
pub trait ControlChannel: Send + Sync {
    /// The address this endpoint is bound to.
    fn address(&self) -> ChannelAddress;

    /// Broadcast a frame to every user-space listener. No acknowledgment;
    /// listeners that went away are silently skipped.
    fn broadcast(&self, frame: ExclusiveFrame) -> Result<(), ChannelError>;
}

/// Factory for kernel-side channel endpoints.
pub trait ChannelProvider: Send + Sync {
    /// Bind an endpoint at `addr`. Fails with
    /// [`ChannelError::AddressInUse`] when the address is taken.
    fn bind(&self, addr: ChannelAddress) -> Result<Arc<dyn ControlChannel>, ChannelError>;
}
