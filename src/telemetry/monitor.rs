//! Connection-health monitor
//!
//! Layers a handshake/heartbeat state machine over the link engine. While
//! disconnected the local link-stats object is sent (acked) as a liveness
//! probe; once the peer's stats object is seen updating the session is
//! connected and the cadence relaxes. Inactivity beyond the timeout fires
//! `disconnected` exactly once and the probe cadence resumes. On connect
//! every registered object type is refreshed one request at a time, gated
//! on transaction completion, so the transport is never saturated.

use crate::link::engine::{ComStats, LinkEngine, TransactionEvent};
use crate::obj::notify::{emit, Handler, SignalList, Token};
use crate::obj::{ObjectEvent, ObjectRegistry};
use crate::objects::stats::{
    device_link_stats_descriptor, ground_link_stats_descriptor, LinkStats, LinkStatus,
    DEVICE_LINK_STATS_ID, GROUND_LINK_STATS_ID,
};
use crate::error::Result;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Probe period while disconnected
pub const STATS_CONNECT_PERIOD_MS: u64 = 2000;
/// Stats exchange period while connected
pub const STATS_UPDATE_PERIOD_MS: u64 = 4000;
/// Inactivity window before the session is declared lost
pub const CONNECTION_TIMEOUT_MS: u64 = 8000;
/// Deadline for one bulk-refresh request before it is skipped
pub const RETRIEVE_TIMEOUT_MS: u64 = 2000;

/// Monitor timing knobs; defaults are the protocol constants
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub connect_period: Duration,
    pub update_period: Duration,
    pub connection_timeout: Duration,
    pub retrieve_timeout: Duration,
    /// Granularity of the monitor's internal deadline checks
    pub tick: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            connect_period: Duration::from_millis(STATS_CONNECT_PERIOD_MS),
            update_period: Duration::from_millis(STATS_UPDATE_PERIOD_MS),
            connection_timeout: Duration::from_millis(CONNECTION_TIMEOUT_MS),
            retrieve_timeout: Duration::from_millis(RETRIEVE_TIMEOUT_MS),
            tick: Duration::from_millis(100),
        }
    }
}

/// Events feeding the monitor's worker thread
pub(super) enum MonitorEvent {
    /// The peer's link-stats object was observed updating
    RemoteStats,
    /// An engine transaction resolved
    Transaction { obj_id: u32, success: bool },
    /// The underlying transport closed
    TransportClosed,
    Stop,
}

/// Observable session state shared with the manager
pub(super) struct MonitorShared {
    connected: AtomicBool,
    on_connected: Mutex<SignalList<()>>,
    on_disconnected: Mutex<SignalList<()>>,
    /// (tx rate, rx rate) in bytes/s, published with each stats send
    telemetry_updated: Mutex<SignalList<(f64, f64)>>,
}

impl MonitorShared {
    fn fire_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
        let handlers = self.on_connected.lock().snapshot();
        emit(&handlers, &());
    }

    fn fire_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
        let handlers = self.on_disconnected.lock().snapshot();
        emit(&handlers, &());
    }
}

/// Connection state machine and periodic refresh driver
pub struct TelemetryMonitor {
    tx: Sender<MonitorEvent>,
    handle: Option<JoinHandle<()>>,
    registry: Arc<ObjectRegistry>,
    engine: Arc<LinkEngine>,
    shared: Arc<MonitorShared>,
    remote_token: Token,
    trans_token: Token,
}

impl TelemetryMonitor {
    /// Start monitoring a session with default (protocol) timing
    pub fn new(registry: Arc<ObjectRegistry>, engine: Arc<LinkEngine>) -> Result<Self> {
        Self::with_config(registry, engine, MonitorConfig::default())
    }

    /// Start monitoring with explicit timing (shortened in tests)
    pub fn with_config(
        registry: Arc<ObjectRegistry>,
        engine: Arc<LinkEngine>,
        config: MonitorConfig,
    ) -> Result<Self> {
        // Both stats types must exist; registration is a no-op if the
        // application already did it
        registry.register(&device_link_stats_descriptor(), None)?;
        registry.register(&ground_link_stats_descriptor(), None)?;

        let (tx, rx) = unbounded();

        let shared = Arc::new(MonitorShared {
            connected: AtomicBool::new(false),
            on_connected: Mutex::new(SignalList::new()),
            on_disconnected: Mutex::new(SignalList::new()),
            telemetry_updated: Mutex::new(SignalList::new()),
        });

        let remote_token = {
            let tx = tx.clone();
            registry.subscribe_updated(
                DEVICE_LINK_STATS_ID,
                0,
                Arc::new(move |_: &ObjectEvent| {
                    let _ = tx.send(MonitorEvent::RemoteStats);
                }),
            )?
        };
        let trans_token = {
            let tx = tx.clone();
            engine.on_transaction_completed(Arc::new(move |ev: &TransactionEvent| {
                let _ = tx.send(MonitorEvent::Transaction {
                    obj_id: ev.obj_id,
                    success: ev.success,
                });
            }))
        };

        let worker = Worker {
            registry: Arc::clone(&registry),
            engine: Arc::clone(&engine),
            shared: Arc::clone(&shared),
            config,
        };
        let handle = std::thread::Builder::new()
            .name("telemetry-monitor".into())
            .spawn(move || worker.run(rx))
            .map_err(crate::error::Error::Io)?;

        Ok(TelemetryMonitor {
            tx,
            handle: Some(handle),
            registry,
            engine,
            shared,
            remote_token,
            trans_token,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    pub fn on_connected(&self, handler: Handler<()>) -> Token {
        self.shared.on_connected.lock().subscribe(handler)
    }

    pub fn on_disconnected(&self, handler: Handler<()>) -> Token {
        self.shared.on_disconnected.lock().subscribe(handler)
    }

    /// Subscribe to periodic (tx, rx) byte-rate updates
    pub fn on_telemetry_updated(&self, handler: Handler<(f64, f64)>) -> Token {
        self.shared.telemetry_updated.lock().subscribe(handler)
    }

    /// Notify the monitor that the session transport closed
    pub(super) fn notify_transport_closed(&self) {
        let _ = self.tx.send(MonitorEvent::TransportClosed);
    }

    /// Event channel handle for the session's reader thread
    pub(super) fn event_sender(&self) -> Sender<MonitorEvent> {
        self.tx.clone()
    }

    /// Stop the worker thread, firing `disconnected` if currently connected
    pub fn stop(&mut self) {
        let _ = self.tx.send(MonitorEvent::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.registry
            .unsubscribe_updated(DEVICE_LINK_STATS_ID, 0, self.remote_token);
        self.engine.remove_transaction_listener(self.trans_token);
        if self.shared.connected.load(Ordering::Relaxed) {
            self.shared.fire_disconnected();
        }
    }
}

impl Drop for TelemetryMonitor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Connected,
}

struct Worker {
    registry: Arc<ObjectRegistry>,
    engine: Arc<LinkEngine>,
    shared: Arc<MonitorShared>,
    config: MonitorConfig,
}

impl Worker {
    fn run(self, rx: crossbeam_channel::Receiver<MonitorEvent>) {
        let mut state = SessionState::Disconnected;
        let mut next_stats = Instant::now();
        let mut last_activity = Instant::now();
        let mut refresh_queue: VecDeque<u32> = VecDeque::new();
        let mut pending_retrieve: Option<(u32, Instant)> = None;
        let mut rate_stats: ComStats = self.engine.stats();
        let mut rate_time = Instant::now();

        loop {
            match rx.recv_timeout(self.config.tick) {
                Ok(MonitorEvent::Stop) => break,
                Ok(MonitorEvent::TransportClosed) => {
                    // Hard event: release link/session state immediately
                    self.engine.handle_transport_closed();
                    refresh_queue.clear();
                    pending_retrieve = None;
                    if state == SessionState::Connected {
                        log::warn!("Telemetry transport closed");
                        state = SessionState::Disconnected;
                        self.shared.fire_disconnected();
                    }
                    next_stats = Instant::now() + self.config.connect_period;
                }
                Ok(MonitorEvent::RemoteStats) => {
                    last_activity = Instant::now();
                    if state == SessionState::Disconnected {
                        state = SessionState::Connected;
                        log::info!("Telemetry link established");
                        self.shared.fire_connected();
                        next_stats = Instant::now() + self.config.update_period;
                        refresh_queue = self.refresh_targets();
                        log::debug!("Bulk refresh: {} object types", refresh_queue.len());
                        pending_retrieve = self.request_next(&mut refresh_queue);
                    }
                }
                Ok(MonitorEvent::Transaction { obj_id, success }) => {
                    if let Some((pending_id, _)) = pending_retrieve {
                        if pending_id == obj_id {
                            if !success {
                                log::warn!("Object retrieve {:#010x} NACKed, skipping", obj_id);
                            }
                            pending_retrieve = self.request_next(&mut refresh_queue);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();

            // Connection-loss check: distinct from transport closure, the
            // link stays up and the probe cadence resumes
            if state == SessionState::Connected
                && now.duration_since(last_activity) >= self.config.connection_timeout
            {
                log::warn!("Telemetry connection timed out");
                state = SessionState::Disconnected;
                refresh_queue.clear();
                pending_retrieve = None;
                self.shared.fire_disconnected();
                next_stats = now;
            }

            // A stalled retrieve must not wedge the whole refresh
            if let Some((obj_id, started)) = pending_retrieve {
                if now.duration_since(started) >= self.config.retrieve_timeout {
                    log::warn!("Object retrieve {:#010x} timed out, skipping", obj_id);
                    self.engine.cancel_transaction(obj_id);
                    pending_retrieve = self.request_next(&mut refresh_queue);
                }
            }

            if now >= next_stats {
                self.send_local_stats(state, &mut rate_stats, &mut rate_time);
                next_stats = now
                    + match state {
                        SessionState::Disconnected => self.config.connect_period,
                        SessionState::Connected => self.config.update_period,
                    };
            }
        }
    }

    /// Data types to walk during bulk refresh; the stats pair is already
    /// part of the heartbeat exchange
    fn refresh_targets(&self) -> VecDeque<u32> {
        self.registry
            .data_object_ids()
            .into_iter()
            .filter(|&id| id != DEVICE_LINK_STATS_ID && id != GROUND_LINK_STATS_ID)
            .collect()
    }

    /// Issue the next queued retrieve, skipping objects that fail to send
    fn request_next(&self, queue: &mut VecDeque<u32>) -> Option<(u32, Instant)> {
        while let Some(obj_id) = queue.pop_front() {
            let all = self
                .engine
                .registry()
                .type_info(obj_id)
                .map(|i| !i.single_instance)
                .unwrap_or(false);
            match self.engine.send_object_request(obj_id, 0, all) {
                Ok(()) => return Some((obj_id, Instant::now())),
                Err(e) => {
                    log::warn!("Object retrieve request {:#010x} failed: {}", obj_id, e);
                }
            }
        }
        log::debug!("Bulk object refresh complete");
        None
    }

    /// Refresh the local stats payload and send it acked to the peer
    fn send_local_stats(
        &self,
        state: SessionState,
        rate_stats: &mut ComStats,
        rate_time: &mut Instant,
    ) {
        let now = Instant::now();
        let stats = self.engine.stats();
        let dt = now.duration_since(*rate_time).as_secs_f64().max(1e-3);
        let tx_rate = f64::from(stats.tx_bytes.wrapping_sub(rate_stats.tx_bytes)) / dt;
        let rx_rate = f64::from(stats.rx_bytes.wrapping_sub(rate_stats.rx_bytes)) / dt;
        *rate_stats = stats;
        *rate_time = now;

        let payload = LinkStats {
            status: match state {
                SessionState::Disconnected => LinkStatus::HandshakeReq,
                SessionState::Connected => LinkStatus::Connected,
            },
            tx_data_rate: tx_rate as f32,
            rx_data_rate: rx_rate as f32,
            tx_failures: stats.tx_errors,
            rx_failures: stats.rx_errors,
        };
        if let Err(e) = self
            .registry
            .write(GROUND_LINK_STATS_ID, 0, &payload.to_bytes())
        {
            log::error!("Failed to update local link stats: {}", e);
            return;
        }
        if let Err(e) = self.engine.send_object(GROUND_LINK_STATS_ID, 0, true, false) {
            log::debug!("Link stats send failed: {}", e);
        }

        let handlers = self.shared.telemetry_updated.lock().snapshot();
        emit(&handlers, &(tx_rate, rx_rate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::frame::{encode_frame, FrameType};
    use crate::link::SYNC_VAL;
    use crate::obj::TypeDescriptor;
    use crate::transport::MockTransport;
    use std::sync::atomic::AtomicUsize;

    fn short_config() -> MonitorConfig {
        MonitorConfig {
            connect_period: Duration::from_millis(40),
            update_period: Duration::from_millis(60),
            connection_timeout: Duration::from_millis(200),
            retrieve_timeout: Duration::from_millis(50),
            tick: Duration::from_millis(10),
        }
    }

    fn setup() -> (Arc<ObjectRegistry>, Arc<LinkEngine>, MockTransport) {
        let registry = Arc::new(ObjectRegistry::new());
        let transport = MockTransport::new();
        let engine = Arc::new(LinkEngine::new(
            Arc::clone(&registry),
            Box::new(transport.clone()),
        ));
        (registry, engine, transport)
    }

    fn remote_stats_frame() -> Vec<u8> {
        let payload = LinkStats {
            status: LinkStatus::HandshakeReq,
            ..Default::default()
        };
        encode_frame(
            FrameType::Obj,
            DEVICE_LINK_STATS_ID,
            None,
            &payload.to_bytes(),
        )
    }

    /// Count stats probe frames (OBJ_ACK for the ground stats id) in a dump
    fn count_probes(bytes: &[u8]) -> usize {
        let mut count = 0;
        let id = GROUND_LINK_STATS_ID.to_le_bytes();
        for window in bytes.windows(8) {
            if window[0] == SYNC_VAL
                && window[1] == FrameType::ObjAck as u8
                && window[4..8] == id
            {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_probes_while_disconnected() {
        let (registry, engine, transport) = setup();
        let mut monitor =
            TelemetryMonitor::with_config(registry, engine, short_config()).unwrap();

        std::thread::sleep(Duration::from_millis(150));
        monitor.stop();

        assert!(!monitor.is_connected());
        // connect_period 40ms over 150ms: at least the immediate probe plus two
        assert!(count_probes(&transport.get_written()) >= 3);
    }

    #[test]
    fn test_connects_on_remote_stats_and_times_out() {
        let (registry, engine, _transport) = setup();
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));

        let mut monitor = TelemetryMonitor::with_config(
            Arc::clone(&registry),
            Arc::clone(&engine),
            short_config(),
        )
        .unwrap();
        let c = Arc::clone(&connects);
        monitor.on_connected(Arc::new(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        }));
        let d = Arc::clone(&disconnects);
        monitor.on_disconnected(Arc::new(move |_| {
            d.fetch_add(1, Ordering::Relaxed);
        }));

        engine.process_input(&remote_stats_frame());
        std::thread::sleep(Duration::from_millis(60));
        assert!(monitor.is_connected());
        assert_eq!(connects.load(Ordering::Relaxed), 1);

        // No further activity: the timeout fires disconnected exactly once
        std::thread::sleep(Duration::from_millis(400));
        assert!(!monitor.is_connected());
        assert_eq!(disconnects.load(Ordering::Relaxed), 1);

        monitor.stop();
        assert_eq!(disconnects.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_activity_resets_timeout() {
        let (registry, engine, _transport) = setup();
        let disconnects = Arc::new(AtomicUsize::new(0));

        let mut monitor = TelemetryMonitor::with_config(
            Arc::clone(&registry),
            Arc::clone(&engine),
            short_config(),
        )
        .unwrap();
        let d = Arc::clone(&disconnects);
        monitor.on_disconnected(Arc::new(move |_| {
            d.fetch_add(1, Ordering::Relaxed);
        }));

        // Keep feeding remote stats well inside the 200ms window
        for _ in 0..6 {
            engine.process_input(&remote_stats_frame());
            std::thread::sleep(Duration::from_millis(80));
        }
        assert!(monitor.is_connected());
        assert_eq!(disconnects.load(Ordering::Relaxed), 0);
        monitor.stop();
    }

    #[test]
    fn test_bulk_refresh_requests_one_at_a_time() {
        let (registry, engine, transport) = setup();
        registry
            .register(&TypeDescriptor::new(0x700, "Attitude", true, 4), None)
            .unwrap();
        registry
            .register(&TypeDescriptor::new(0x800, "Waypoint", false, 2), Some(0))
            .unwrap();

        let mut monitor = TelemetryMonitor::with_config(
            Arc::clone(&registry),
            Arc::clone(&engine),
            short_config(),
        )
        .unwrap();

        engine.process_input(&remote_stats_frame());
        std::thread::sleep(Duration::from_millis(40));

        // Only the first retrieve is outstanding until it resolves
        let written = transport.get_written();
        assert!(written
            .windows(8)
            .any(|w| w[0] == SYNC_VAL
                && w[1] == FrameType::ObjReq as u8
                && w[4..8] == 0x700u32.to_le_bytes()));
        assert!(!written
            .windows(8)
            .any(|w| w[1] == FrameType::ObjReq as u8 && w[4..8] == 0x800u32.to_le_bytes()));

        // Answer the first request; the second follows
        engine.process_input(&encode_frame(FrameType::Obj, 0x700, None, &[1, 2, 3, 4]));
        std::thread::sleep(Duration::from_millis(40));
        assert!(transport
            .get_written()
            .windows(8)
            .any(|w| w[1] == FrameType::ObjReq as u8 && w[4..8] == 0x800u32.to_le_bytes()));

        monitor.stop();
    }

    #[test]
    fn test_stalled_refresh_advances_after_deadline() {
        let (registry, engine, transport) = setup();
        registry
            .register(&TypeDescriptor::new(0x700, "Attitude", true, 4), None)
            .unwrap();
        registry
            .register(&TypeDescriptor::new(0x800, "Waypoint", false, 2), Some(0))
            .unwrap();

        let mut monitor = TelemetryMonitor::with_config(
            Arc::clone(&registry),
            Arc::clone(&engine),
            short_config(),
        )
        .unwrap();

        engine.process_input(&remote_stats_frame());
        // Never answer: the 50ms retrieve deadline must move things along
        std::thread::sleep(Duration::from_millis(250));
        let written = transport.get_written();
        assert!(written
            .windows(8)
            .any(|w| w[1] == FrameType::ObjReq as u8 && w[4..8] == 0x800u32.to_le_bytes()));

        monitor.stop();
    }
}
