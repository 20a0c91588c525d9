//! The bridge context object.
//!
//! [`Bridge`] owns the tap registry and the host/channel seams. It is
//! constructed once at startup (creating every configured unit, or none at
//! all) and torn down explicitly. The host calls into it from its own
//! scheduling contexts: `transmit` for outbound frames, `deliver` when a
//! control channel has pending messages.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use tracing::{debug, error, info};

use crate::channel::{ChannelProvider, InboundMessage};
use crate::config::Config;
use crate::error::BridgeError;
use crate::host::NetHost;
use crate::instance::TapInstance;
use crate::stats::StatsSnapshot;
use xtap_frame::{FrameAlloc, FrameBuf};
use xtap_registry::{ChannelAddress, TapRegistry};

/// The bridge: tap registry plus the seams everything flows through.
pub struct Bridge {
    config: Config,
    host: Arc<dyn NetHost>,
    provider: Arc<dyn ChannelProvider>,
    alloc: Arc<dyn FrameAlloc>,
    registry: RwLock<TapRegistry<Arc<TapInstance>>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Initialize the bridge: validate the configuration and create every
    /// configured tap unit.
    ///
    /// Creation is all-or-nothing: if any unit fails, every unit created
    /// earlier in the batch is unregistered and freed, and the error is
    /// returned with the registry empty.
    pub fn new(
        config: Config,
        host: Arc<dyn NetHost>,
        provider: Arc<dyn ChannelProvider>,
        alloc: Arc<dyn FrameAlloc>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let mut registry = TapRegistry::new(config.max_taps)?;

        for unit in 0..config.max_taps {
            match TapInstance::create(unit, host.as_ref(), config.verbosity) {
                Ok(instance) => registry.register(unit, instance)?,
                Err(err) => {
                    error!(unit, error = %err, "tap creation failed, rolling back batch");
                    for (rolled_back, instance) in registry.drain() {
                        host.unregister_iface(instance.iface());
                        debug!(unit = rolled_back, "tap rolled back");
                    }
                    return Err(err);
                }
            }
        }

        info!(max_taps = config.max_taps, "bridge initialized");

        Ok(Self {
            config,
            host,
            provider,
            alloc,
            registry: RwLock::new(registry),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn max_taps(&self) -> u32 {
        self.config.max_taps
    }

    /// Resolve a unit to its tap instance.
    pub fn lookup(&self, unit: u32) -> Option<Arc<TapInstance>> {
        self.registry.read().unwrap().lookup(unit).cloned()
    }

    /// Number of currently registered units.
    pub fn registered_units(&self) -> usize {
        self.registry.read().unwrap().registered_count()
    }

    /// Open one tap.
    pub fn open(&self, unit: u32) -> Result<(), BridgeError> {
        self.lookup(unit)
            .ok_or(BridgeError::UnitNotRegistered { unit })?
            .open(self.provider.as_ref())
    }

    /// Open every registered tap.
    pub fn open_all(&self) -> Result<(), BridgeError> {
        for unit in 0..self.max_taps() {
            self.open(unit)?;
        }
        Ok(())
    }

    /// Close one tap. It remains registered and may be reopened.
    pub fn close(&self, unit: u32) -> Result<(), BridgeError> {
        self.lookup(unit)
            .ok_or(BridgeError::UnitNotRegistered { unit })?
            .close();
        Ok(())
    }

    /// Host transmit entry point for one outbound frame.
    pub fn transmit(&self, unit: u32, frame: FrameBuf) -> Result<(), BridgeError> {
        self.lookup(unit)
            .ok_or(BridgeError::UnitNotRegistered { unit })?
            .transmit(frame, self.alloc.as_ref())
    }

    /// Delivery entry point: the control channel at `addr` has pending
    /// messages.
    ///
    /// If the address resolves to no registered tap, every pending message
    /// is drained undelivered and a critical condition logged; the bridge
    /// carries on. Otherwise messages are delivered in arrival order, each
    /// one's outcome used only for logging.
    pub fn deliver(&self, addr: ChannelAddress, pending: &mut VecDeque<InboundMessage>) {
        let instance = addr.unit().and_then(|unit| self.lookup(unit));

        let Some(instance) = instance else {
            error!(addr = %addr, purged = pending.len(), "bad unit, purging pending messages");
            pending.clear();
            return;
        };

        if instance.verbosity() > 3 {
            debug!(dev = %instance.name(), pending = pending.len(), "delivering inbound batch");
        }

        while let Some(message) = pending.pop_front() {
            match instance.deliver_one(message, self.host.as_ref(), self.alloc.as_ref()) {
                Ok(len) => {
                    if instance.verbosity() > 3 {
                        debug!(dev = %instance.name(), len, "frame delivered");
                    }
                }
                Err(err) => {
                    debug!(dev = %instance.name(), error = %err, "inbound message rejected");
                }
            }
        }
    }

    /// Counter snapshot for one unit.
    pub fn stats(&self, unit: u32) -> Option<StatsSnapshot> {
        self.lookup(unit).map(|instance| instance.stats())
    }

    /// Tear the bridge down: close and unregister every tap.
    ///
    /// Each slot is cleared before its interface is unregistered, so the
    /// delivery path can never resolve a unit whose interface is
    /// mid-teardown.
    pub fn shutdown(&self) {
        let mut registry = self.registry.write().unwrap();
        for (unit, instance) in registry.drain() {
            instance.close();
            self.host.unregister_iface(instance.iface());
            debug!(unit, "tap destroyed");
        }
        info!("bridge shut down");
    }
}
