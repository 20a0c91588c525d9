//! xtap bridge library
//!
//! Bridges X.25 layer-2 frames between a host packet path and a user-space
//! counterpart. Each tap unit is a virtual interface: frames the host
//! transmits on it are classified by their leading control byte and
//! broadcast over the unit's control channel; frames written back by user
//! space are validated and injected into the host receive path.
//!
//! ## Architecture
//!
//! ```text
//! user program ⇄ ControlChannel ⇄ Bridge ⇄ NetHost (host packet path)
//!                                    │
//!                                TapRegistry (unit → TapInstance)
//! ```
//!
//! The host side and the channel transport sit behind traits ([`NetHost`],
//! [`channel::ChannelProvider`]) so the bridge core runs identically under
//! the daemon, the loopback bus, or a test harness.
//!
//! ## Modules
//!
//! - `bridge`: the [`Bridge`] context object (batch create/rollback,
//!   delivery demux, teardown)
//! - `instance`: per-unit state and the transmit/receive frame paths
//! - `channel`: control-channel seam and the in-process loopback bus
//! - `host`: host packet-path seam and the recording mock
//! - `config` / `error` / `stats`: ambient plumbing

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod host;
pub mod instance;
pub mod pump;
pub mod stats;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::Config;
pub use error::{BridgeError, ConfigError};
pub use host::{IfaceId, IfaceSpec, MockNetHost, NetHost, PacketType, RxFrame};
pub use instance::TapInstance;
pub use stats::{StatsSnapshot, TapStats};
