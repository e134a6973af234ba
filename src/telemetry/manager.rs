//! Telemetry session over one transport
//!
//! Ties a link engine, a reader thread and the connection monitor into one
//! start/stop unit. The reader thread pumps transport bytes into the
//! engine's frame parser; a read failure is treated as transport closure
//! and ends the session.

use crate::error::Result;
use crate::link::engine::LinkEngine;
use crate::obj::notify::{Handler, Token};
use crate::obj::ObjectRegistry;
use crate::telemetry::monitor::{MonitorConfig, MonitorEvent, TelemetryMonitor};
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const READ_BUFFER_SIZE: usize = 512;
/// Reader backoff when a poll returns no data
const READ_IDLE_SLEEP: Duration = Duration::from_millis(2);

/// One running telemetry session
pub struct TelemetryManager {
    engine: Arc<LinkEngine>,
    monitor: TelemetryMonitor,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl TelemetryManager {
    /// Start a session on the given transport with protocol-default timing
    pub fn start(registry: Arc<ObjectRegistry>, transport: Box<dyn Transport>) -> Result<Self> {
        Self::start_with_config(registry, transport, MonitorConfig::default())
    }

    /// Start a session with explicit monitor timing
    pub fn start_with_config(
        registry: Arc<ObjectRegistry>,
        transport: Box<dyn Transport>,
        config: MonitorConfig,
    ) -> Result<Self> {
        let engine = Arc::new(LinkEngine::new(Arc::clone(&registry), transport));
        let monitor = TelemetryMonitor::with_config(registry, Arc::clone(&engine), config)?;

        let running = Arc::new(AtomicBool::new(true));
        let reader = {
            let engine = Arc::clone(&engine);
            let running = Arc::clone(&running);
            let events = monitor.event_sender();
            std::thread::Builder::new()
                .name("telemetry-reader".into())
                .spawn(move || {
                    let mut buf = [0u8; READ_BUFFER_SIZE];
                    while running.load(Ordering::Relaxed) {
                        match engine.read_transport(&mut buf) {
                            Ok(0) => std::thread::sleep(READ_IDLE_SLEEP),
                            Ok(n) => engine.process_input(&buf[..n]),
                            Err(e) => {
                                log::warn!("Telemetry transport read failed: {}", e);
                                let _ = events.send(MonitorEvent::TransportClosed);
                                break;
                            }
                        }
                    }
                })
                .map_err(crate::error::Error::Io)?
        };

        log::info!("Telemetry session started");
        Ok(TelemetryManager {
            engine,
            monitor,
            running,
            reader: Some(reader),
        })
    }

    pub fn engine(&self) -> &Arc<LinkEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        self.engine.registry()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn on_connected(&self, handler: Handler<()>) -> Token {
        self.monitor.on_connected(handler)
    }

    pub fn on_disconnected(&self, handler: Handler<()>) -> Token {
        self.monitor.on_disconnected(handler)
    }

    /// Subscribe to periodic (tx, rx) byte-rate updates
    pub fn on_telemetry_updated(&self, handler: Handler<(f64, f64)>) -> Token {
        self.monitor.on_telemetry_updated(handler)
    }

    /// End the session: stop the reader thread, then the monitor.
    ///
    /// Fires `disconnected` if the session was connected.
    pub fn stop(&mut self) {
        if self.reader.is_none() {
            return;
        }
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        self.monitor.stop();
        log::info!("Telemetry session stopped");
    }
}

impl Drop for TelemetryManager {
    fn drop(&mut self) {
        self.stop();
    }
}
