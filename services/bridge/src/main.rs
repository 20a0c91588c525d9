//! xtapd
//!
//! Daemon wrapper around the bridge. Creates the configured tap units,
//! opens their control channels on the in-process loopback bus, and runs
//! one delivery pump per unit until shutdown.
//!
//! ## Architecture
//!
//! - **Bridge**: unit registry plus the transmit/delivery frame paths
//! - **Loopback Bus**: addressed datagram channel to user-space handles
//! - **Delivery Pumps**: per-unit tasks draining pending messages
//! - **Host**: packet-path seam (recording mock for now)

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use xtap_bridge::channel::LoopbackBus;
use xtap_bridge::host::MockNetHost;
use xtap_bridge::{pump, Bridge, Config};
use xtap_frame::SystemAlloc;
use xtap_registry::ChannelAddress;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.tracing_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting xtap bridge");
    info!(
        max_taps = config.max_taps,
        verbosity = config.verbosity,
        "Configuration loaded"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Host packet path (recording mock for now)
    let host = Arc::new(MockNetHost::new());

    // Control-channel bus
    let bus = Arc::new(LoopbackBus::new());

    // Create the bridge and bring every tap up
    let provider: Arc<dyn xtap_bridge::channel::ChannelProvider> = bus.clone();
    let bridge = Arc::new(Bridge::new(config, host, provider, Arc::new(SystemAlloc))?);
    bridge.open_all()?;

    // Start one delivery pump per unit
    let mut pump_handles = Vec::new();
    for unit in 0..bridge.max_taps() {
        let addr = ChannelAddress::from_unit(unit);
        pump_handles.push(tokio::spawn(pump::run_delivery_loop(
            Arc::clone(&bridge),
            Arc::clone(&bus),
            addr,
            shutdown_rx.clone(),
        )));
    }

    info!(taps = bridge.max_taps(), "xtap bridge running");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for handle in pump_handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "delivery pump task failed");
        }
    }

    bridge.shutdown();
    info!("xtap bridge stopped");
    Ok(())
}
