//! Host packet-path interface and mock implementation.
//!
//! The host owns interface registration and the receive path; the bridge
//! calls it through the [`NetHost`] trait so the core never depends on a
//! particular host. A recording mock is provided for testing and
//! development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};

use xtap_frame::ExclusiveFrame;

/// Layer-2 protocol tag stamped on every delivered frame.
pub const ETH_P_X25: u16 = 0x0805;

/// Link-layer type of a tap interface.
pub const ARPHRD_X25: u16 = 271;

/// Synthetic hardware address shared by all tap interfaces. The FE:FD
/// prefix distinguishes them from real hardware.
pub const X25TAP_HW_ADDR: [u8; 6] = [0xFE, 0xFD, 0x00, 0x00, 0x00, 0x00];

/// Size of the auxiliary control block carried by a delivered frame.
pub const CB_LEN: usize = 48;

/// Errors reported by the host.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// Interface registration was refused.
    #[error("registration refused: {0}")]
    RegistrationRefused(String),
}

/// Handle to a registered interface, issued by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IfaceId(pub u32);

/// Properties of a tap interface, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceSpec {
    pub name: String,
    pub hw_addr: [u8; 6],
    pub no_arp: bool,
    pub mtu: u32,
    pub header_len: u32,
    pub addr_len: u32,
    pub link_type: u16,
    pub tx_queue_len: u32,
}

impl IfaceSpec {
    /// The spec of tap unit `unit`: no ARP, X.25 link type, MTU smaller
    /// than Ethernet's, a single-byte header, and a shallow transmit queue.
    pub fn x25tap(unit: u32) -> Self {
        Self {
            name: format!("x25tap{}", unit),
            hw_addr: X25TAP_HW_ADDR,
            no_arp: true,
            mtu: 1024,
            header_len: 1,
            addr_len: 0,
            link_type: ARPHRD_X25,
            tx_queue_len: 10,
        }
    }
}

/// Origin marker of a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Addressed to this host. The only marker the bridge produces.
    Host,
}

/// An inbound frame stamped for the host receive path.
#[derive(Debug)]
pub struct RxFrame {
    /// Interface the frame belongs to.
    pub iface: IfaceId,
    /// Layer-2 protocol tag.
    pub protocol: u16,
    /// Origin marker.
    pub pkt_type: PacketType,
    /// Auxiliary control block, cleared before hand-off.
    pub cb: [u8; CB_LEN],
    /// The frame itself, exclusively owned.
    pub data: ExclusiveFrame,
}

impl RxFrame {
    /// Stamp an exclusively-owned frame for delivery on `iface`.
    pub fn stamp(iface: IfaceId, data: ExclusiveFrame) -> Self {
        Self {
            iface,
            protocol: ETH_P_X25,
            pkt_type: PacketType::Host,
            cb: [0; CB_LEN],
            data,
        }
    }
}

/// Host packet-path interface.
pub trait NetHost: Send + Sync {
    /// Register an interface, returning its handle.
    fn register_iface(&self, spec: &IfaceSpec) -> Result<IfaceId, HostError>;

    /// Unregister an interface. Idempotent.
    fn unregister_iface(&self, iface: IfaceId);

    /// Host boot parameters for a unit, if any. The low bits override the
    /// tap's diagnostic verbosity at creation.
    fn boot_params(&self, _unit: u32) -> Option<u64> {
        None
    }

    /// Inject a stamped frame into the host receive path.
    fn receive(&self, frame: RxFrame);
}

/// Recording mock host for testing and development.
pub struct MockNetHost {
    /// Counter for issuing interface handles.
    next_iface: AtomicU32,

    /// Registered interfaces by handle.
    registered: Mutex<HashMap<u32, IfaceSpec>>,

    /// Frames injected into the receive path.
    received: Mutex<Vec<RxFrame>>,

    /// Per-unit boot parameters.
    boot_params: Mutex<HashMap<u32, u64>>,

    /// Registrations allowed before the mock starts refusing, if set.
    fail_after: Option<u32>,
}

impl MockNetHost {
    /// Create a new mock host.
    pub fn new() -> Self {
        Self {
            next_iface: AtomicU32::new(1),
            registered: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            boot_params: Mutex::new(HashMap::new()),
            fail_after: None,
        }
    }

    /// Create a mock host that refuses registration after `n` successes.
    pub fn failing_after(n: u32) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new()
        }
    }

    /// Provide boot parameters for a unit.
    pub fn set_boot_params(&self, unit: u32, value: u64) {
        self.boot_params.lock().unwrap().insert(unit, value);
    }

    /// Number of currently registered interfaces.
    pub fn registered_count(&self) -> usize {
        self.registered.lock().unwrap().len()
    }

    /// Whether an interface handle is currently registered.
    pub fn is_registered(&self, iface: IfaceId) -> bool {
        self.registered.lock().unwrap().contains_key(&iface.0)
    }

    /// Spec of a registered interface.
    pub fn iface_spec(&self, iface: IfaceId) -> Option<IfaceSpec> {
        self.registered.lock().unwrap().get(&iface.0).cloned()
    }

    /// Frames injected so far, clearing the record.
    pub fn take_received(&self) -> Vec<RxFrame> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }

    /// Number of frames injected so far.
    pub fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl Default for MockNetHost {
    fn default() -> Self {
        Self::new()
    }
}

impl NetHost for MockNetHost {
    fn register_iface(&self, spec: &IfaceSpec) -> Result<IfaceId, HostError> {
        let mut registered = self.registered.lock().unwrap();

        if let Some(limit) = self.fail_after {
            if registered.len() as u32 >= limit {
                return Err(HostError::RegistrationRefused(format!(
                    "mock host refuses registration of {}",
                    spec.name
                )));
            }
        }

        let id = self.next_iface.fetch_add(1, Ordering::SeqCst);
        registered.insert(id, spec.clone());
        info!(dev = %spec.name, iface = id, "[MOCK] interface registered");
        Ok(IfaceId(id))
    }

    fn unregister_iface(&self, iface: IfaceId) {
        if self.registered.lock().unwrap().remove(&iface.0).is_some() {
            info!(iface = iface.0, "[MOCK] interface unregistered");
        }
    }

    fn boot_params(&self, unit: u32) -> Option<u64> {
        self.boot_params.lock().unwrap().get(&unit).copied()
    }

    fn receive(&self, frame: RxFrame) {
        debug!(
            iface = frame.iface.0,
            len = frame.data.len(),
            "[MOCK] frame entered receive path"
        );
        self.received.lock().unwrap().push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x25tap_spec() {
        let spec = IfaceSpec::x25tap(2);
        assert_eq!(spec.name, "x25tap2");
        assert_eq!(spec.hw_addr, [0xFE, 0xFD, 0x00, 0x00, 0x00, 0x00]);
        assert!(spec.no_arp);
        assert_eq!(spec.mtu, 1024);
        assert_eq!(spec.header_len, 1);
        assert_eq!(spec.addr_len, 0);
        assert_eq!(spec.link_type, ARPHRD_X25);
        assert_eq!(spec.tx_queue_len, 10);
    }

    #[test]
    fn test_mock_register_unregister() {
        let host = MockNetHost::new();
        let id = host.register_iface(&IfaceSpec::x25tap(0)).unwrap();
        assert!(host.is_registered(id));
        host.unregister_iface(id);
        assert!(!host.is_registered(id));
        assert_eq!(host.registered_count(), 0);
    }

    #[test]
    fn test_mock_fail_after() {
        let host = MockNetHost::failing_after(1);
        host.register_iface(&IfaceSpec::x25tap(0)).unwrap();
        assert!(host.register_iface(&IfaceSpec::x25tap(1)).is_err());
    }

    #[test]
    fn test_rx_frame_stamp() {
        let frame = RxFrame::stamp(IfaceId(3), ExclusiveFrame::from(vec![0x00, 0x01]));
        assert_eq!(frame.protocol, ETH_P_X25);
        assert_eq!(frame.pkt_type, PacketType::Host);
        assert_eq!(frame.cb, [0; CB_LEN]);
        assert_eq!(frame.iface, IfaceId(3));
    }
}
