//! Delivery pump: drains a unit's control-channel inbox into the bridge.
//!
//! One pump task runs per open tap, standing in for the scheduling context
//! the channel transport would otherwise invoke the bridge from.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::bridge::Bridge;
use crate::channel::LoopbackBus;
use xtap_registry::ChannelAddress;

/// Run the delivery loop for `addr` until shutdown is signaled.
pub async fn run_delivery_loop(
    bridge: Arc<Bridge>,
    bus: Arc<LoopbackBus>,
    addr: ChannelAddress,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = bus.pending_notified(addr) => {
                let mut pending = bus.take_pending(addr);
                if !pending.is_empty() {
                    bridge.deliver(addr, &mut pending);
                }
            }
        }
    }

    debug!(addr = %addr, "delivery loop stopped");
}
