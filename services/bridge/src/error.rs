//! Error types for the bridge service.

use thiserror::Error;

use crate::channel::ChannelError;
use crate::host::HostError;
use xtap_frame::AllocError;
use xtap_registry::{RegistryError, MAX_UNITS};

/// Bridge errors.
///
/// Per-frame variants are handled locally by the caller (the frame is
/// released, a counter bumped, processing continues); per-unit registration
/// failures roll back the whole creation batch; configuration errors abort
/// initialization.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Frame duplication failed under memory pressure.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// The host refused to register a tap interface.
    #[error("unit {unit}: interface registration failed: {source}")]
    Registration {
        unit: u32,
        #[source]
        source: HostError,
    },

    /// The control channel could not be bound (or is gone).
    #[error("unit {unit}: control channel unavailable: {source}")]
    ChannelUnavailable {
        unit: u32,
        #[source]
        source: ChannelError,
    },

    /// Zero-length frame, rejected before classification.
    #[error("unit {unit}: zero-length frame")]
    MalformedFrame { unit: u32 },

    /// Inbound message from a sender other than the privileged local one.
    #[error("unit {unit}: message from unauthorized sender {sender}")]
    UnauthorizedSender { unit: u32, sender: u32 },

    /// Outbound frame with an unrecognized leading byte.
    #[error("unit {unit}: unknown control byte 0x{code:02x}")]
    UnknownControlCode { unit: u32, code: u8 },

    /// Operation on a unit with no registered instance.
    #[error("unit {unit} not registered")]
    UnitNotRegistered { unit: u32 },

    /// Registry bookkeeping failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Configuration rejected at load time.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Load-time configuration errors. All of these abort initialization.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `max_taps` exceeds the control-channel address space.
    #[error("max_taps {requested} exceeds address space limit {max}", max = MAX_UNITS)]
    TooManyTaps { requested: u32 },

    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    /// Config file could not be read.
    #[error("config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed.
    #[error("config file: {0}")]
    Parse(#[from] serde_json::Error),
}
