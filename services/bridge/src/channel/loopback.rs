//! In-process loopback control-channel bus.
//!
//! Models the addressed datagram channel the bridge expects: one kernel
//! endpoint per address, any number of user-space handles. User sends park
//! messages in the address's inbox and wake the delivery pump; kernel
//! broadcasts fan out to every connected user handle. Addresses free up
//! when the kernel endpoint is dropped, so a closed tap can be reopened.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::Notify;

use super::{ChannelError, ChannelProvider, ControlChannel, InboundMessage, SenderId};
use xtap_frame::{ExclusiveFrame, FrameBuf};
use xtap_registry::ChannelAddress;

/// One address's shared state on the bus.
struct Endpoint {
    addr: ChannelAddress,

    /// Whether a kernel endpoint currently holds this address.
    bound: AtomicBool,

    /// Messages pending delivery, oldest first.
    inbox: Mutex<VecDeque<InboundMessage>>,

    /// Wakes the delivery pump when the inbox gains a message.
    pending: Notify,

    /// Broadcast listeners.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

/// The loopback bus.
pub struct LoopbackBus {
    endpoints: Mutex<HashMap<u32, Arc<Endpoint>>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    fn endpoint(&self, addr: ChannelAddress) -> Arc<Endpoint> {
        let mut endpoints = self.endpoints.lock().unwrap();
        Arc::clone(endpoints.entry(addr.value()).or_insert_with(|| {
            Arc::new(Endpoint {
                addr,
                bound: AtomicBool::new(false),
                inbox: Mutex::new(VecDeque::new()),
                pending: Notify::new(),
                subscribers: Mutex::new(Vec::new()),
            })
        }))
    }

    /// Connect a user-space handle to `addr` with the given credential.
    pub fn connect(&self, addr: ChannelAddress, sender: SenderId) -> UserHandle {
        let endpoint = self.endpoint(addr);
        let (tx, rx) = mpsc::unbounded_channel();
        endpoint.subscribers.lock().unwrap().push(tx);
        UserHandle {
            endpoint,
            sender,
            rx,
        }
    }

    /// Wait until `addr` has pending messages.
    pub async fn pending_notified(&self, addr: ChannelAddress) {
        let endpoint = self.endpoint(addr);
        endpoint.pending.notified().await;
    }

    /// Take everything pending at `addr`, oldest first.
    pub fn take_pending(&self, addr: ChannelAddress) -> VecDeque<InboundMessage> {
        let endpoint = self.endpoint(addr);
        let mut inbox = endpoint.inbox.lock().unwrap();
        std::mem::take(&mut *inbox)
    }

    /// Number of messages pending at `addr`.
    pub fn pending_len(&self, addr: ChannelAddress) -> usize {
        self.endpoint(addr).inbox.lock().unwrap().len()
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelProvider for LoopbackBus {
    fn bind(&self, addr: ChannelAddress) -> Result<Arc<dyn ControlChannel>, ChannelError> {
        let endpoint = self.endpoint(addr);
        if endpoint.bound.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::AddressInUse(addr));
        }
        Ok(Arc::new(KernelEndpoint { endpoint }))
    }
}

/// Kernel-side endpoint handed to a tap on open. Dropping it frees the
/// address for a later reopen.
struct KernelEndpoint {
    endpoint: Arc<Endpoint>,
}

impl ControlChannel for KernelEndpoint {
    fn address(&self) -> ChannelAddress {
        self.endpoint.addr
    }

    fn broadcast(&self, frame: ExclusiveFrame) -> Result<(), ChannelError> {
        let bytes = frame.into_vec();
        let mut subscribers = self.endpoint.subscribers.lock().unwrap();
        // Datagram semantics: dead listeners are dropped, nobody is waited on.
        subscribers.retain(|tx| tx.send(bytes.clone()).is_ok());
        Ok(())
    }
}

impl Drop for KernelEndpoint {
    fn drop(&mut self) {
        self.endpoint.bound.store(false, Ordering::SeqCst);
    }
}

/// User-space side of a control channel.
pub struct UserHandle {
    endpoint: Arc<Endpoint>,
    sender: SenderId,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl UserHandle {
    /// The credential this handle sends with.
    pub fn sender(&self) -> SenderId {
        self.sender
    }

    /// Write a frame toward the kernel side.
    pub fn send(&self, payload: Vec<u8>) {
        let message = InboundMessage {
            payload: FrameBuf::new(payload),
            sender: self.sender,
        };
        self.endpoint.inbox.lock().unwrap().push_back(message);
        self.endpoint.pending.notify_one();
    }

    /// Await the next broadcast frame.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Non-blocking read of the next broadcast frame.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}
