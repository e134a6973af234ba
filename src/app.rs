//! Application orchestration for the link gateway
//!
//! Bridges a serial device link to a UDP ground-station link over one shared
//! object registry. The device side runs a full telemetry session (monitor
//! plus reader thread); the ground side is a relay with its own reader
//! thread, so device updates stream to the ground station and ground-station
//! writes reach the registry without echoing back.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::link::engine::LinkEngine;
use crate::obj::ObjectRegistry;
use crate::objects::stats::GROUND_LINK_STATS_ID;
use crate::relay::ObjectRelay;
use crate::telemetry::TelemetryManager;
use crate::transport::{SerialTransport, UdpTransport};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Main application structure that manages both links
pub struct GatewayApp {
    config: AppConfig,
    registry: Arc<ObjectRegistry>,
    manager: TelemetryManager,
    relay: Arc<ObjectRelay>,
    relay_reader: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl GatewayApp {
    /// Open both links and start their threads
    pub fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing link gateway");

        let registry = Arc::new(ObjectRegistry::new());

        info!(
            "Opening device link on {} @ {}",
            config.device.port, config.device.baud_rate
        );
        let serial = SerialTransport::open(&config.device.port, config.device.baud_rate)?;
        let manager = TelemetryManager::start(Arc::clone(&registry), Box::new(serial))?;

        manager.on_connected(Arc::new(|_| {
            info!("Device link connected");
        }));
        manager.on_disconnected(Arc::new(|_| {
            warn!("Device link disconnected");
        }));

        info!(
            "Opening ground link {} -> {}",
            config.ground.bind_address, config.ground.peer_address
        );
        let udp = UdpTransport::open(&config.ground.bind_address, &config.ground.peer_address)?;
        let ground_engine = Arc::new(LinkEngine::new(Arc::clone(&registry), Box::new(udp)));
        let relay = Arc::new(ObjectRelay::new(ground_engine, GROUND_LINK_STATS_ID));

        let shutdown = Arc::new(AtomicBool::new(false));
        let relay_reader = Some(Self::spawn_relay_reader(
            Arc::clone(&relay),
            Arc::clone(&shutdown),
        )?);

        info!("Gateway initialized");
        Ok(Self {
            config,
            registry,
            manager,
            relay,
            relay_reader,
            shutdown,
        })
    }

    /// Reader thread for the ground link.
    ///
    /// A connected UDP socket can surface transient errors (e.g. ICMP port
    /// unreachable while the ground station is down), so read failures reset
    /// the receive state and keep polling instead of ending the session.
    fn spawn_relay_reader(
        relay: Arc<ObjectRelay>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("ground-reader".to_string())
            .spawn(move || {
                let mut buf = [0u8; 512];
                while !shutdown.load(Ordering::Relaxed) {
                    match relay.engine().read_transport(&mut buf) {
                        Ok(0) => std::thread::sleep(Duration::from_millis(2)),
                        Ok(n) => relay.process_input(&buf[..n]),
                        Err(e) => {
                            debug!("Ground link read error: {}", e);
                            relay.handle_transport_closed();
                            std::thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
                debug!("Ground reader thread exiting");
            })
            .map_err(Error::Io)
    }

    /// Run until a shutdown signal arrives
    pub fn run(&mut self) -> Result<()> {
        let shutdown = Arc::clone(&self.shutdown);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            shutdown.store(true, Ordering::Relaxed);
        })
        .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

        info!(
            "Gateway running: {} <-> {}",
            self.config.device.port, self.config.ground.peer_address
        );
        info!("Press Ctrl+C to stop");

        let mut last_stats = Instant::now();
        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));

            if last_stats.elapsed().as_secs() >= 10 {
                self.log_statistics();
                last_stats = Instant::now();
            }
        }

        self.stop();
        Ok(())
    }

    fn log_statistics(&self) {
        let device = self.manager.engine().stats();
        let ground = self.relay.engine().stats();
        info!(
            "Device link: connected={} tx={}B rx={}B rx_errors={}",
            self.manager.is_connected(),
            device.tx_bytes,
            device.rx_bytes,
            device.rx_errors
        );
        info!(
            "Ground link: tx={}B rx={}B rx_errors={} | {} object types",
            ground.tx_bytes,
            ground.rx_bytes,
            ground.rx_errors,
            self.registry.data_object_ids().len()
        );
    }

    /// Stop both links
    pub fn stop(&mut self) {
        info!("Shutting down gateway...");
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.relay_reader.take() {
            let _ = handle.join();
        }
        self.manager.stop();
        info!("Gateway stopped");
    }
}

impl Drop for GatewayApp {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.relay_reader.take() {
            let _ = handle.join();
        }
    }
}
