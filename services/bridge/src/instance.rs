//! Per-unit tap state and the frame paths.
//!
//! A [`TapInstance`] owns everything tied to one tap unit: the registered
//! host interface, the traffic counters, and the control-channel slot. The
//! transmit path classifies an outbound frame by its leading control byte
//! and broadcasts it to user space; the receive path validates a message
//! written back by user space and injects it into the host receive path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::channel::{ChannelError, ChannelProvider, ControlChannel, InboundMessage};
use crate::error::BridgeError;
use crate::host::{IfaceId, IfaceSpec, NetHost, RxFrame};
use crate::stats::{StatsSnapshot, TapStats};
use xtap_frame::{ControlCode, FrameAlloc, FrameBuf};
use xtap_registry::ChannelAddress;

/// One tap unit.
pub struct TapInstance {
    unit: u32,
    name: String,
    iface: IfaceId,

    /// Diagnostic verbosity for this tap (module default, possibly
    /// overridden by host boot parameters at creation).
    verbosity: u8,

    stats: TapStats,

    /// The control-channel slot. `None` while the tap is closed. Close
    /// empties the slot *before* the endpoint is released, so a transmit
    /// racing with close finds no channel instead of a dying one.
    channel: Mutex<Option<Arc<dyn ControlChannel>>>,

    /// Whether the transmit path is enabled.
    tx_active: AtomicBool,
}

impl TapInstance {
    /// Create the tap for `unit` and register its interface with the host.
    pub(crate) fn create(
        unit: u32,
        host: &dyn NetHost,
        default_verbosity: u8,
    ) -> Result<Arc<Self>, BridgeError> {
        let spec = IfaceSpec::x25tap(unit);

        // Host boot parameters may carry a per-device verbosity override in
        // the low bits, kernel-style.
        let verbosity = match host.boot_params(unit) {
            Some(mem_start) if mem_start & 0xf != 0 => (mem_start & 0x7) as u8,
            _ => default_verbosity,
        };

        let iface = host
            .register_iface(&spec)
            .map_err(|source| BridgeError::Registration { unit, source })?;

        info!(dev = %spec.name, unit, iface = iface.0, "tap created");

        Ok(Arc::new(Self {
            unit,
            name: spec.name,
            iface,
            verbosity,
            stats: TapStats::new(),
            channel: Mutex::new(None),
            tx_active: AtomicBool::new(false),
        }))
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iface(&self) -> IfaceId {
        self.iface
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Whether the tap is open (transmit path enabled).
    pub fn is_open(&self) -> bool {
        self.tx_active.load(Ordering::Acquire)
    }

    /// Counter snapshot for the host's statistics query.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// When the tap last delivered an inbound frame.
    pub fn last_activity(&self) -> Option<std::time::Instant> {
        self.stats.last_activity()
    }

    /// Open the tap: bind the control channel at the unit's address and
    /// enable the transmit path. A bind failure (address in use) leaves the
    /// tap closed.
    pub fn open(&self, provider: &dyn ChannelProvider) -> Result<(), BridgeError> {
        if self.verbosity > 2 {
            debug!(dev = %self.name, "opening control channel");
        }

        let addr = ChannelAddress::from_unit(self.unit);
        let channel = provider
            .bind(addr)
            .map_err(|source| BridgeError::ChannelUnavailable {
                unit: self.unit,
                source,
            })?;

        *self.channel.lock().unwrap() = Some(channel);
        self.tx_active.store(true, Ordering::Release);
        Ok(())
    }

    /// Close the tap: disable the transmit path, then release the control
    /// channel. May be reopened later.
    pub fn close(&self) {
        if self.verbosity > 2 {
            debug!(dev = %self.name, "shutting down");
        }

        self.tx_active.store(false, Ordering::Release);

        // Empty the slot first; the endpoint is released only once no new
        // transmit can observe it.
        let endpoint = self.channel.lock().unwrap().take();
        drop(endpoint);
    }

    /// Transmit path: classify the outbound frame and broadcast it on the
    /// control channel.
    ///
    /// Every path releases the frame exactly once: Unknown control bytes
    /// and duplication failures drop it with a counter bump, everything
    /// else forwards it.
    pub fn transmit(&self, frame: FrameBuf, alloc: &dyn FrameAlloc) -> Result<(), BridgeError> {
        if !self.tx_active.load(Ordering::Acquire) {
            self.stats.inc_tx_dropped();
            return Err(BridgeError::ChannelUnavailable {
                unit: self.unit,
                source: ChannelError::Closed,
            });
        }

        // Length is validated before the control byte is consulted;
        // classifying an empty frame is undefined.
        if frame.is_empty() {
            debug!(dev = %self.name, "empty outbound frame");
            return Err(BridgeError::MalformedFrame { unit: self.unit });
        }

        let frame = match frame.make_exclusive(alloc) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.inc_tx_dropped();
                return Err(BridgeError::Alloc(err));
            }
        };

        match ControlCode::classify(frame.as_slice()[0]) {
            ControlCode::Data => {
                // The control byte itself is not payload.
                self.stats.add_tx(frame.len() as u64 - 1);
            }
            ControlCode::Connect => {
                if self.verbosity > 1 {
                    debug!(dev = %self.name, "connection request");
                }
            }
            ControlCode::Disconnect => {
                if self.verbosity > 1 {
                    debug!(dev = %self.name, "disconnect request");
                }
            }
            ControlCode::SetParams => {
                // Unsupported, but deliberately forwarded anyway; the peer
                // decides what to do with it.
                warn!(dev = %self.name, "setting of options not supported");
            }
            ControlCode::Unknown(code) => {
                debug!(dev = %self.name, code, "unknown first byte");
                self.stats.inc_tx_dropped();
                return Err(BridgeError::UnknownControlCode {
                    unit: self.unit,
                    code,
                });
            }
        }

        let channel = self.channel.lock().unwrap().clone();
        match channel {
            Some(channel) => {
                channel
                    .broadcast(frame)
                    .map_err(|source| BridgeError::ChannelUnavailable {
                        unit: self.unit,
                        source,
                    })
            }
            None => {
                // Raced with close; the slot was already emptied. Fail
                // closed.
                self.stats.inc_tx_dropped();
                Err(BridgeError::ChannelUnavailable {
                    unit: self.unit,
                    source: ChannelError::Closed,
                })
            }
        }
    }

    /// Receive path for one message written back from user space.
    ///
    /// Returns the delivered byte length; errors are per-message and the
    /// caller uses them only for logging.
    pub fn deliver_one(
        &self,
        message: InboundMessage,
        host: &dyn NetHost,
        alloc: &dyn FrameAlloc,
    ) -> Result<usize, BridgeError> {
        let len = message.payload.len();

        if len < 1 {
            debug!(dev = %self.name, len, "zero-length inbound message");
            self.stats.inc_rx_errors();
            return Err(BridgeError::MalformedFrame { unit: self.unit });
        }

        // Sole admission-control check: only the privileged local identity
        // may write frames into a tap. No counter for this one.
        if !message.sender.is_privileged() {
            info!(dev = %self.name, sender = message.sender.0, "unauthorized sender");
            return Err(BridgeError::UnauthorizedSender {
                unit: self.unit,
                sender: message.sender.0,
            });
        }

        let frame = match message.payload.make_exclusive(alloc) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.inc_rx_dropped();
                return Err(BridgeError::Alloc(err));
            }
        };

        let control_byte = frame.as_slice()[0];
        let rx = RxFrame::stamp(self.iface, frame);

        // Only data frames count toward receive statistics.
        if control_byte == 0x00 {
            self.stats.add_rx(len as u64);
        }

        host.receive(rx);
        self.stats.touch();
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channel::{LoopbackBus, SenderId};
    use crate::host::MockNetHost;
    use xtap_frame::{AllocError, SystemAlloc};

    struct FailingAlloc;

    impl FrameAlloc for FailingAlloc {
        fn clone_frame(&self, data: &[u8]) -> Result<Vec<u8>, AllocError> {
            Err(AllocError { len: data.len() })
        }
    }

    fn open_tap(host: &MockNetHost, bus: &LoopbackBus) -> Arc<TapInstance> {
        let tap = TapInstance::create(0, host, 5).unwrap();
        tap.open(bus).unwrap();
        tap
    }

    #[test]
    fn test_data_frame_counts_payload_and_broadcasts() {
        let host = MockNetHost::new();
        let bus = LoopbackBus::new();
        let mut user = bus.connect(ChannelAddress::from_unit(0), SenderId::LOCAL);
        let tap = open_tap(&host, &bus);

        tap.transmit(FrameBuf::new(vec![0x00, 0xAA, 0xBB, 0xCC]), &SystemAlloc)
            .unwrap();

        let stats = tap.stats();
        assert_eq!(stats.tx_bytes, 3);
        assert_eq!(stats.tx_packets, 1);
        assert_eq!(user.try_recv(), Some(vec![0x00, 0xAA, 0xBB, 0xCC]));
    }

    #[test]
    fn test_connect_disconnect_forward_without_stats() {
        let host = MockNetHost::new();
        let bus = LoopbackBus::new();
        let mut user = bus.connect(ChannelAddress::from_unit(0), SenderId::LOCAL);
        let tap = open_tap(&host, &bus);

        tap.transmit(FrameBuf::new(vec![0x01, 0xAA]), &SystemAlloc)
            .unwrap();
        tap.transmit(FrameBuf::new(vec![0x02]), &SystemAlloc)
            .unwrap();

        assert_eq!(tap.stats(), StatsSnapshot::default());
        assert_eq!(user.try_recv(), Some(vec![0x01, 0xAA]));
        assert_eq!(user.try_recv(), Some(vec![0x02]));
    }

    #[test]
    fn test_set_params_still_forwarded() {
        let host = MockNetHost::new();
        let bus = LoopbackBus::new();
        let mut user = bus.connect(ChannelAddress::from_unit(0), SenderId::LOCAL);
        let tap = open_tap(&host, &bus);

        tap.transmit(FrameBuf::new(vec![0x03, 0x07]), &SystemAlloc)
            .unwrap();

        assert_eq!(tap.stats(), StatsSnapshot::default());
        assert_eq!(user.try_recv(), Some(vec![0x03, 0x07]));
    }

    #[test]
    fn test_unknown_byte_dropped_not_broadcast() {
        let host = MockNetHost::new();
        let bus = LoopbackBus::new();
        let mut user = bus.connect(ChannelAddress::from_unit(0), SenderId::LOCAL);
        let tap = open_tap(&host, &bus);

        let err = tap
            .transmit(FrameBuf::new(vec![0x42, 0xAA]), &SystemAlloc)
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnknownControlCode { code: 0x42, .. }
        ));
        assert_eq!(tap.stats().tx_dropped, 1);
        assert_eq!(user.try_recv(), None);
    }

    #[test]
    fn test_shared_outbound_frame_clone_failure_drops_and_counts() {
        let host = MockNetHost::new();
        let bus = LoopbackBus::new();
        let mut user = bus.connect(ChannelAddress::from_unit(0), SenderId::LOCAL);
        let tap = open_tap(&host, &bus);

        let original = FrameBuf::new(vec![0x00, 0x01]);
        let err = tap.transmit(original.share(), &FailingAlloc).unwrap_err();

        assert!(matches!(err, BridgeError::Alloc(_)));
        assert_eq!(tap.stats().tx_dropped, 1);
        assert_eq!(user.try_recv(), None);
        // The transmit path's reference was released.
        assert_eq!(original.ref_count(), 1);
    }

    #[test]
    fn test_transmit_while_closed_fails_closed() {
        let host = MockNetHost::new();
        let tap = TapInstance::create(0, &host, 5).unwrap();

        let err = tap
            .transmit(FrameBuf::new(vec![0x00, 0x01]), &SystemAlloc)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ChannelUnavailable { .. }));
        assert_eq!(tap.stats().tx_dropped, 1);
    }

    #[test]
    fn test_close_and_reopen() {
        let host = MockNetHost::new();
        let bus = LoopbackBus::new();
        let tap = open_tap(&host, &bus);
        assert!(tap.is_open());

        tap.close();
        assert!(!tap.is_open());

        // The address was freed; reopening succeeds.
        tap.open(&bus).unwrap();
        assert!(tap.is_open());
    }

    #[test]
    fn test_open_fails_when_address_in_use() {
        let host = MockNetHost::new();
        let bus = LoopbackBus::new();
        let _holder = bus.bind(ChannelAddress::from_unit(0)).unwrap();

        let tap = TapInstance::create(0, &host, 5).unwrap();
        let err = tap.open(&bus).unwrap_err();
        assert!(matches!(err, BridgeError::ChannelUnavailable { .. }));
        assert!(!tap.is_open());
    }

    #[test]
    fn test_deliver_data_frame() {
        let host = MockNetHost::new();
        let tap = TapInstance::create(0, &host, 5).unwrap();

        let message = InboundMessage {
            payload: FrameBuf::new(vec![0x00, 0xAA, 0xBB]),
            sender: SenderId::LOCAL,
        };
        let len = tap.deliver_one(message, &host, &SystemAlloc).unwrap();
        assert_eq!(len, 3);

        let stats = tap.stats();
        assert_eq!(stats.rx_packets, 1);
        assert_eq!(stats.rx_bytes, 3);
        assert!(tap.last_activity().is_some());

        let received = host.take_received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data.as_slice(), &[0x00, 0xAA, 0xBB]);
    }

    #[test]
    fn test_deliver_non_data_frame_skips_rx_stats() {
        let host = MockNetHost::new();
        let tap = TapInstance::create(0, &host, 5).unwrap();

        let message = InboundMessage {
            payload: FrameBuf::new(vec![0x01, 0xAA]),
            sender: SenderId::LOCAL,
        };
        tap.deliver_one(message, &host, &SystemAlloc).unwrap();

        let stats = tap.stats();
        assert_eq!(stats.rx_packets, 0);
        assert_eq!(stats.rx_bytes, 0);
        // Still delivered.
        assert_eq!(host.received_count(), 1);
    }

    #[test]
    fn test_deliver_zero_length_counts_rx_errors() {
        let host = MockNetHost::new();
        let tap = TapInstance::create(0, &host, 5).unwrap();

        let message = InboundMessage {
            payload: FrameBuf::new(Vec::new()),
            sender: SenderId::LOCAL,
        };
        let err = tap.deliver_one(message, &host, &SystemAlloc).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFrame { .. }));
        assert_eq!(tap.stats().rx_errors, 1);
        assert_eq!(host.received_count(), 0);
    }

    #[test]
    fn test_deliver_unauthorized_sender_changes_nothing() {
        let host = MockNetHost::new();
        let tap = TapInstance::create(0, &host, 5).unwrap();

        let message = InboundMessage {
            payload: FrameBuf::new(vec![0x00, 0xAA]),
            sender: SenderId(1000),
        };
        let err = tap.deliver_one(message, &host, &SystemAlloc).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnauthorizedSender { sender: 1000, .. }
        ));
        assert_eq!(tap.stats(), StatsSnapshot::default());
        assert_eq!(host.received_count(), 0);
    }

    #[test]
    fn test_deliver_clone_failure_counts_rx_dropped() {
        let host = MockNetHost::new();
        let tap = TapInstance::create(0, &host, 5).unwrap();

        let original = FrameBuf::new(vec![0x00, 0xAA]);
        let message = InboundMessage {
            payload: original.share(),
            sender: SenderId::LOCAL,
        };
        let err = tap.deliver_one(message, &host, &FailingAlloc).unwrap_err();
        assert!(matches!(err, BridgeError::Alloc(_)));
        assert_eq!(tap.stats().rx_dropped, 1);
        assert_eq!(host.received_count(), 0);
        assert_eq!(original.ref_count(), 1);
    }

    #[test]
    fn test_boot_params_override_verbosity() {
        let host = MockNetHost::new();
        // Low nibble set: verbosity comes from the low three bits.
        host.set_boot_params(0, 0x3);
        let tap = TapInstance::create(0, &host, 5).unwrap();
        assert_eq!(tap.verbosity(), 3);

        // No override when the low nibble is clear.
        host.set_boot_params(1, 0x10);
        let tap = TapInstance::create(1, &host, 5).unwrap();
        assert_eq!(tap.verbosity(), 5);
    }
}
