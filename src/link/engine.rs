//! Link engine: transmit path, receive dispatch and transaction tracking
//!
//! One engine per transport. Inbound bytes run through the frame parser and
//! valid frames are dispatched against the registry; outbound sends frame
//! the registry's current payload. Acked sends and requests are tracked as
//! transactions, at most one per object id, resolved by ACK / NACK / the
//! requested object arriving, or dropped by `cancel_transaction`. Corrupt
//! input is never fatal: it is counted in `rx_errors` and parsing resumes at
//! the next sync byte.

use crate::error::{Error, Result};
use crate::link::frame::{
    encode_frame, Frame, FrameParser, FrameType, ALL_INSTANCES,
};
use crate::obj::notify::{emit, Handler, SignalList, Token};
use crate::obj::{ObjectRegistry, ObjectSnapshot};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Monotonic link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComStats {
    pub tx_bytes: u32,
    pub rx_bytes: u32,
    pub tx_object_bytes: u32,
    pub rx_object_bytes: u32,
    pub tx_objects: u32,
    pub rx_objects: u32,
    pub tx_errors: u32,
    pub rx_errors: u32,
}

/// Resolution of one tracked acked-send or request
#[derive(Debug, Clone, Copy)]
pub struct TransactionEvent {
    pub obj_id: u32,
    pub inst_id: u16,
    pub success: bool,
}

/// Pending state for one in-flight acked send or request
struct Transaction {
    inst_id: u16,
    #[allow(dead_code)] // kept for parity with the tx path; retries are the caller's job
    all_instances: bool,
}

/// Framed protocol engine over one transport
pub struct LinkEngine {
    registry: Arc<ObjectRegistry>,
    io: Mutex<Box<dyn Transport>>,
    parser: Mutex<FrameParser>,
    transactions: Mutex<HashMap<u32, Transaction>>,
    stats: Mutex<ComStats>,
    transaction_completed: Mutex<SignalList<TransactionEvent>>,
}

impl LinkEngine {
    pub fn new(registry: Arc<ObjectRegistry>, transport: Box<dyn Transport>) -> Self {
        LinkEngine {
            registry,
            io: Mutex::new(transport),
            parser: Mutex::new(FrameParser::new()),
            transactions: Mutex::new(HashMap::new()),
            stats: Mutex::new(ComStats::default()),
            transaction_completed: Mutex::new(SignalList::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    /// Snapshot the link counters
    pub fn stats(&self) -> ComStats {
        *self.stats.lock()
    }

    /// Zero the link counters
    pub fn reset_stats(&self) {
        *self.stats.lock() = ComStats::default();
    }

    /// Subscribe to transaction resolutions
    pub fn on_transaction_completed(&self, handler: Handler<TransactionEvent>) -> Token {
        self.transaction_completed.lock().subscribe(handler)
    }

    pub fn remove_transaction_listener(&self, token: Token) {
        self.transaction_completed.lock().unsubscribe(token);
    }

    /// Encode and transmit an object update.
    ///
    /// `acked = true` sends an OBJ_ACK frame and records a transaction for
    /// the object id before transmission; the peer's ACK resolves it. A new
    /// acked send for the same id supersedes any pending transaction. A
    /// transmit failure releases the transaction again, so the error return
    /// is the only failure surface. Fails without transport side effects if
    /// the object is unresolved.
    pub fn send_object(
        &self,
        obj_id: u32,
        inst_id: u16,
        acked: bool,
        all_instances: bool,
    ) -> Result<()> {
        self.check_resolvable(obj_id, inst_id, all_instances)?;
        if acked {
            self.transactions.lock().insert(
                obj_id,
                Transaction {
                    inst_id,
                    all_instances,
                },
            );
        }
        let frame_type = if acked {
            FrameType::ObjAck
        } else {
            FrameType::Obj
        };
        let result = self.transmit_object(frame_type, obj_id, inst_id, all_instances);
        if acked && result.is_err() {
            self.transactions.lock().remove(&obj_id);
        }
        result
    }

    /// Transmit an OBJ_REQ frame; always tracked as a transaction
    ///
    /// The response is the object itself (success) or a NACK (failure).
    pub fn send_object_request(
        &self,
        obj_id: u32,
        inst_id: u16,
        all_instances: bool,
    ) -> Result<()> {
        self.check_resolvable(obj_id, inst_id, all_instances)?;
        self.transactions.lock().insert(
            obj_id,
            Transaction {
                inst_id,
                all_instances,
            },
        );
        let result = self.transmit_object(FrameType::ObjReq, obj_id, inst_id, all_instances);
        if result.is_err() {
            self.transactions.lock().remove(&obj_id);
        }
        result
    }

    /// Drop any pending transaction for the object without firing completion
    pub fn cancel_transaction(&self, obj_id: u32) {
        self.transactions.lock().remove(&obj_id);
    }

    /// Read from the owned transport into `buf`.
    ///
    /// Used by session reader threads; the transport lock is held only for
    /// the duration of one (short-timeout) read.
    pub fn read_transport(&self, buf: &mut [u8]) -> Result<usize> {
        self.io.lock().read(buf)
    }

    /// Feed received transport bytes through the parser and dispatch frames
    pub fn process_input(&self, data: &[u8]) {
        for frame in self.parse_input(data) {
            self.dispatch_frame(frame);
        }
    }

    /// Transport closed: reset the receive state machine and drop pending
    /// transactions without firing completions.
    pub fn handle_transport_closed(&self) {
        self.parser.lock().reset();
        self.transactions.lock().clear();
        log::debug!("Transport closed, receive state reset");
    }

    /// Parse bytes into complete frames, updating byte/error counters.
    ///
    /// Split from dispatch so the relay can substitute its own frame
    /// handling over the same parser and counters.
    pub(crate) fn parse_input(&self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut errors = 0u32;
        {
            let mut parser = self.parser.lock();
            for &byte in data {
                match parser.push(byte, &self.registry) {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => {}
                    Err(e) => {
                        errors += 1;
                        log::debug!("Rx frame error: {}", e);
                    }
                }
            }
        }
        let mut stats = self.stats.lock();
        stats.rx_bytes = stats.rx_bytes.wrapping_add(data.len() as u32);
        stats.rx_errors = stats.rx_errors.wrapping_add(errors);
        frames
    }

    /// Handle one validated frame (base, non-relay semantics)
    pub(crate) fn dispatch_frame(&self, frame: Frame) {
        match frame.frame_type {
            FrameType::Obj => {
                // All-instances is only meaningful for requests
                if frame.all_instances() {
                    self.count_rx_error("all-instances OBJ");
                    return;
                }
                if self.apply_received(&frame).is_ok() {
                    // A pending request for this object is now satisfied
                    self.complete_transaction(frame.obj_id, true);
                } else {
                    self.count_rx_error("OBJ for unknown object");
                }
            }
            FrameType::ObjAck => {
                if frame.all_instances() {
                    self.count_rx_error("all-instances OBJ_ACK");
                    return;
                }
                if self.apply_received(&frame).is_ok() {
                    if let Err(e) = self.transmit_ack(frame.obj_id, frame.inst_id) {
                        log::warn!("Failed to send ACK for {:#010x}: {}", frame.obj_id, e);
                    }
                } else {
                    self.count_rx_error("OBJ_ACK for unknown object");
                }
            }
            FrameType::ObjReq => {
                let resolved = if frame.all_instances() {
                    self.registry.num_instances(frame.obj_id).unwrap_or(0) > 0
                } else {
                    self.registry.get(frame.obj_id, frame.inst_id).is_some()
                };
                if resolved {
                    if let Err(e) = self.transmit_object(
                        FrameType::Obj,
                        frame.obj_id,
                        frame.inst_id,
                        frame.all_instances(),
                    ) {
                        log::warn!("Failed to answer OBJ_REQ {:#010x}: {}", frame.obj_id, e);
                    }
                } else {
                    self.count_rx_error("OBJ_REQ for unknown object");
                    if let Err(e) = self.transmit_nack(frame.obj_id) {
                        log::warn!("Failed to send NACK for {:#010x}: {}", frame.obj_id, e);
                    }
                }
            }
            FrameType::Ack => {
                if frame.all_instances() || !self.complete_transaction(frame.obj_id, true) {
                    self.count_rx_error("unexpected ACK");
                }
            }
            FrameType::Nack => {
                if frame.all_instances() || !self.complete_transaction(frame.obj_id, false) {
                    self.count_rx_error("unexpected NACK");
                }
            }
        }
    }

    /// Apply a received OBJ / OBJ_ACK payload to the registry.
    ///
    /// Fires the instance's `updated` notification on success. Exposed to
    /// the relay, which wraps it with echo suppression.
    pub(crate) fn apply_received(&self, frame: &Frame) -> Result<()> {
        self.registry
            .write(frame.obj_id, frame.inst_id, &frame.data)?;
        let mut stats = self.stats.lock();
        stats.rx_objects = stats.rx_objects.wrapping_add(1);
        stats.rx_object_bytes = stats.rx_object_bytes.wrapping_add(frame.data.len() as u32);
        Ok(())
    }

    /// Resolve the pending transaction for an object id, firing
    /// `transaction_completed`. Returns false if none was pending.
    pub(crate) fn complete_transaction(&self, obj_id: u32, success: bool) -> bool {
        let Some(trans) = self.transactions.lock().remove(&obj_id) else {
            return false;
        };
        let event = TransactionEvent {
            obj_id,
            inst_id: trans.inst_id,
            success,
        };
        let handlers = self.transaction_completed.lock().snapshot();
        emit(&handlers, &event);
        true
    }

    pub(crate) fn count_rx_error(&self, what: &str) {
        log::debug!("Rx protocol error: {}", what);
        let mut stats = self.stats.lock();
        stats.rx_errors = stats.rx_errors.wrapping_add(1);
    }

    /// Verify an object reference resolves before any transport activity
    fn check_resolvable(&self, obj_id: u32, inst_id: u16, all_instances: bool) -> Result<()> {
        if all_instances {
            match self.registry.num_instances(obj_id) {
                Some(n) if n > 0 => Ok(()),
                _ => Err(Error::UnknownObject { obj_id, inst_id: 0 }),
            }
        } else if self.registry.get(obj_id, inst_id).is_none() {
            Err(Error::UnknownObject { obj_id, inst_id })
        } else {
            Ok(())
        }
    }

    /// Frame and transmit an object message.
    ///
    /// OBJ / OBJ_ACK for "all instances" issue one independent frame per
    /// instance in ascending order; an all-instances OBJ_REQ is a single
    /// frame carrying the wildcard instance id.
    pub(crate) fn transmit_object(
        &self,
        frame_type: FrameType,
        obj_id: u32,
        inst_id: u16,
        all_instances: bool,
    ) -> Result<()> {
        let info = self
            .registry
            .type_info(obj_id)
            .ok_or(Error::UnknownObject { obj_id, inst_id })?;

        match frame_type {
            FrameType::ObjReq => {
                let inst_field = if info.single_instance {
                    None
                } else if all_instances {
                    Some(ALL_INSTANCES)
                } else {
                    Some(inst_id)
                };
                self.transmit_frame(frame_type, obj_id, inst_field, &[], 0)
            }
            FrameType::Obj | FrameType::ObjAck => {
                let targets: Vec<ObjectSnapshot> = if all_instances {
                    self.registry.instances(obj_id)
                } else {
                    self.registry
                        .get(obj_id, inst_id)
                        .map(|s| vec![s])
                        .ok_or(Error::UnknownObject { obj_id, inst_id })?
                };
                for snapshot in targets {
                    let inst_field = if info.single_instance {
                        None
                    } else {
                        Some(snapshot.inst_id)
                    };
                    self.transmit_frame(
                        frame_type,
                        obj_id,
                        inst_field,
                        &snapshot.data,
                        snapshot.data.len(),
                    )?;
                }
                Ok(())
            }
            FrameType::Ack | FrameType::Nack => {
                let inst_field = if info.single_instance {
                    None
                } else {
                    Some(inst_id)
                };
                self.transmit_frame(frame_type, obj_id, inst_field, &[], 0)
            }
        }
    }

    /// ACK reply for a received OBJ_ACK, addressed to the same object
    pub(crate) fn transmit_ack(&self, obj_id: u32, inst_id: u16) -> Result<()> {
        self.transmit_object(FrameType::Ack, obj_id, inst_id, false)
    }

    /// NACK for an unresolvable request; the type may be entirely unknown,
    /// so this frames directly without a registry lookup.
    pub(crate) fn transmit_nack(&self, obj_id: u32) -> Result<()> {
        self.transmit_frame(FrameType::Nack, obj_id, None, &[], 0)
    }

    fn transmit_frame(
        &self,
        frame_type: FrameType,
        obj_id: u32,
        inst_id: Option<u16>,
        data: &[u8],
        object_bytes: usize,
    ) -> Result<()> {
        let bytes = encode_frame(frame_type, obj_id, inst_id, data);
        let result = {
            let mut io = self.io.lock();
            write_all(io.as_mut(), &bytes).and_then(|_| io.flush())
        };
        let mut stats = self.stats.lock();
        match result {
            Ok(()) => {
                stats.tx_bytes = stats.tx_bytes.wrapping_add(bytes.len() as u32);
                stats.tx_objects = stats.tx_objects.wrapping_add(1);
                stats.tx_object_bytes = stats.tx_object_bytes.wrapping_add(object_bytes as u32);
                Ok(())
            }
            Err(e) => {
                stats.tx_errors = stats.tx_errors.wrapping_add(1);
                Err(e)
            }
        }
    }
}

fn write_all(io: &mut dyn Transport, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let n = io.write(data)?;
        if n == 0 {
            return Err(Error::Other("transport wrote zero bytes".into()));
        }
        data = &data[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::TypeDescriptor;
    use crate::transport::MockTransport;
    use parking_lot::Mutex as PlMutex;

    const SINGLE_ID: u32 = 0x100;
    const MULTI_ID: u32 = 0x200;

    fn setup() -> (Arc<ObjectRegistry>, Arc<LinkEngine>, MockTransport) {
        let registry = Arc::new(ObjectRegistry::new());
        registry
            .register(&TypeDescriptor::new(SINGLE_ID, "Single", true, 4), None)
            .unwrap();
        registry
            .register(&TypeDescriptor::new(MULTI_ID, "Multi", false, 2), Some(1))
            .unwrap();
        let transport = MockTransport::new();
        let engine = Arc::new(LinkEngine::new(
            Arc::clone(&registry),
            Box::new(transport.clone()),
        ));
        (registry, engine, transport)
    }

    fn completions(engine: &LinkEngine) -> Arc<PlMutex<Vec<TransactionEvent>>> {
        let events = Arc::new(PlMutex::new(Vec::new()));
        let e = Arc::clone(&events);
        engine.on_transaction_completed(Arc::new(move |ev| e.lock().push(*ev)));
        events
    }

    #[test]
    fn test_send_object_frames_current_payload() {
        let (registry, engine, transport) = setup();
        registry.write(SINGLE_ID, 0, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        engine.send_object(SINGLE_ID, 0, false, false).unwrap();
        let written = transport.get_written();
        assert_eq!(
            written,
            encode_frame(FrameType::Obj, SINGLE_ID, None, &[0xDE, 0xAD, 0xBE, 0xEF])
        );

        let stats = engine.stats();
        assert_eq!(stats.tx_objects, 1);
        assert_eq!(stats.tx_object_bytes, 4);
        assert_eq!(stats.tx_bytes, written.len() as u32);
    }

    #[test]
    fn test_send_unresolved_object_fails_without_side_effect() {
        let (_registry, engine, transport) = setup();
        assert!(engine.send_object(0xDEAD, 0, false, false).is_err());
        assert!(engine.send_object(MULTI_ID, 9, true, false).is_err());
        assert!(engine.send_object_request(0xDEAD, 0, false).is_err());
        assert!(transport.get_written().is_empty());
        assert_eq!(engine.stats().tx_objects, 0);
        // No transaction was recorded either
        engine.process_input(&encode_frame(FrameType::Ack, MULTI_ID, Some(9), &[]));
        assert_eq!(engine.stats().rx_errors, 1);
    }

    #[test]
    fn test_all_instances_send_one_frame_per_instance() {
        let (registry, engine, transport) = setup();
        registry.write(MULTI_ID, 0, &[1, 1]).unwrap();
        registry.write(MULTI_ID, 1, &[2, 2]).unwrap();

        engine.send_object(MULTI_ID, 0, false, true).unwrap();

        let mut expected = encode_frame(FrameType::Obj, MULTI_ID, Some(0), &[1, 1]);
        expected.extend(encode_frame(FrameType::Obj, MULTI_ID, Some(1), &[2, 2]));
        assert_eq!(transport.get_written(), expected);
        assert_eq!(engine.stats().tx_objects, 2);
    }

    #[test]
    fn test_acked_send_resolves_on_ack() {
        let (_registry, engine, transport) = setup();
        let events = completions(&engine);

        engine.send_object(SINGLE_ID, 0, true, false).unwrap();
        assert_eq!(
            transport.get_written(),
            encode_frame(FrameType::ObjAck, SINGLE_ID, None, &[0; 4])
        );
        assert!(events.lock().is_empty());

        engine.process_input(&encode_frame(FrameType::Ack, SINGLE_ID, None, &[]));
        {
            let ev = events.lock();
            assert_eq!(ev.len(), 1);
            assert_eq!(ev[0].obj_id, SINGLE_ID);
            assert!(ev[0].success);
        }

        // A second ACK has no pending transaction to resolve
        engine.process_input(&encode_frame(FrameType::Ack, SINGLE_ID, None, &[]));
        assert_eq!(events.lock().len(), 1);
        assert_eq!(engine.stats().rx_errors, 1);
    }

    #[test]
    fn test_nack_from_peer_without_type_resolves_request() {
        // Peer B does not know the multi-instance type, so its NACK carries
        // no instance field; A must still resolve the pending request
        let (_registry, a_engine, a_transport) = setup();
        let b_transport = MockTransport::new();
        let b_engine = LinkEngine::new(
            Arc::new(ObjectRegistry::new()),
            Box::new(b_transport.clone()),
        );
        let events = completions(&a_engine);

        a_engine.send_object_request(MULTI_ID, 1, false).unwrap();
        b_engine.process_input(&a_transport.get_written());
        a_engine.process_input(&b_transport.get_written());

        let ev = events.lock();
        assert_eq!(ev.len(), 1);
        assert_eq!(ev[0].obj_id, MULTI_ID);
        assert!(!ev[0].success);
        assert_eq!(a_engine.stats().rx_errors, 0);
    }

    #[test]
    fn test_failed_transmit_releases_transaction() {
        let (_registry, engine, transport) = setup();
        let events = completions(&engine);

        transport.close();
        assert!(engine.send_object(SINGLE_ID, 0, true, false).is_err());
        assert!(engine.send_object_request(MULTI_ID, 0, false).is_err());
        assert_eq!(engine.stats().tx_errors, 2);

        // Nothing is left pending for a late ACK to resolve
        engine.process_input(&encode_frame(FrameType::Ack, SINGLE_ID, None, &[]));
        engine.process_input(&encode_frame(FrameType::Nack, MULTI_ID, Some(0), &[]));
        assert!(events.lock().is_empty());
        assert_eq!(engine.stats().rx_errors, 2);
    }

    #[test]
    fn test_nack_resolves_failure() {
        let (_registry, engine, _transport) = setup();
        let events = completions(&engine);

        engine.send_object_request(SINGLE_ID, 0, false).unwrap();
        engine.process_input(&encode_frame(FrameType::Nack, SINGLE_ID, None, &[]));

        let ev = events.lock();
        assert_eq!(ev.len(), 1);
        assert!(!ev[0].success);
    }

    #[test]
    fn test_cancel_suppresses_completion() {
        let (_registry, engine, _transport) = setup();
        let events = completions(&engine);

        engine.send_object(SINGLE_ID, 0, true, false).unwrap();
        engine.cancel_transaction(SINGLE_ID);
        engine.process_input(&encode_frame(FrameType::Ack, SINGLE_ID, None, &[]));

        assert!(events.lock().is_empty());
        assert_eq!(engine.stats().rx_errors, 1);
    }

    #[test]
    fn test_request_resolved_by_object_arrival() {
        let (registry, engine, _transport) = setup();
        let events = completions(&engine);

        engine.send_object_request(SINGLE_ID, 0, false).unwrap();
        engine.process_input(&encode_frame(
            FrameType::Obj,
            SINGLE_ID,
            None,
            &[9, 8, 7, 6],
        ));

        assert_eq!(registry.get(SINGLE_ID, 0).unwrap().data, vec![9, 8, 7, 6]);
        let ev = events.lock();
        assert_eq!(ev.len(), 1);
        assert!(ev[0].success);
    }

    #[test]
    fn test_inbound_obj_req_answered_with_objects() {
        let (registry, engine, transport) = setup();
        registry.write(MULTI_ID, 0, &[3, 3]).unwrap();
        registry.write(MULTI_ID, 1, &[4, 4]).unwrap();

        engine.process_input(&encode_frame(
            FrameType::ObjReq,
            MULTI_ID,
            Some(ALL_INSTANCES),
            &[],
        ));

        let mut expected = encode_frame(FrameType::Obj, MULTI_ID, Some(0), &[3, 3]);
        expected.extend(encode_frame(FrameType::Obj, MULTI_ID, Some(1), &[4, 4]));
        assert_eq!(transport.get_written(), expected);
    }

    #[test]
    fn test_inbound_obj_req_unknown_gets_nack() {
        let (_registry, engine, transport) = setup();

        engine.process_input(&encode_frame(FrameType::ObjReq, 0xDEAD, None, &[]));

        assert_eq!(
            transport.get_written(),
            encode_frame(FrameType::Nack, 0xDEAD, None, &[])
        );
        assert_eq!(engine.stats().rx_errors, 1);
    }

    #[test]
    fn test_inbound_obj_ack_applies_and_acks() {
        let (registry, engine, transport) = setup();

        engine.process_input(&encode_frame(
            FrameType::ObjAck,
            MULTI_ID,
            Some(1),
            &[5, 5],
        ));

        assert_eq!(registry.get(MULTI_ID, 1).unwrap().data, vec![5, 5]);
        assert_eq!(
            transport.get_written(),
            encode_frame(FrameType::Ack, MULTI_ID, Some(1), &[])
        );
        assert_eq!(engine.stats().rx_objects, 1);
        assert_eq!(engine.stats().rx_object_bytes, 2);
    }

    #[test]
    fn test_corrupt_frame_counts_error_without_registry_change() {
        let (registry, engine, _transport) = setup();
        let mut bytes = encode_frame(FrameType::Obj, SINGLE_ID, None, &[1, 2, 3, 4]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        engine.process_input(&bytes);

        assert_eq!(engine.stats().rx_errors, 1);
        assert_eq!(engine.stats().rx_objects, 0);
        assert_eq!(registry.get(SINGLE_ID, 0).unwrap().data, vec![0; 4]);
    }

    #[test]
    fn test_all_instances_sentinel_rejected_outside_requests() {
        let (_registry, engine, transport) = setup();
        engine.process_input(&encode_frame(
            FrameType::Obj,
            MULTI_ID,
            Some(ALL_INSTANCES),
            &[0, 0],
        ));
        assert_eq!(engine.stats().rx_errors, 1);
        assert!(transport.get_written().is_empty());
    }

    #[test]
    fn test_reset_stats() {
        let (_registry, engine, _transport) = setup();
        engine.send_object(SINGLE_ID, 0, false, false).unwrap();
        assert_ne!(engine.stats(), ComStats::default());
        engine.reset_stats();
        assert_eq!(engine.stats(), ComStats::default());
    }

    #[test]
    fn test_transport_closed_clears_pending() {
        let (_registry, engine, _transport) = setup();
        let events = completions(&engine);

        engine.send_object(SINGLE_ID, 0, true, false).unwrap();
        engine.handle_transport_closed();
        engine.process_input(&encode_frame(FrameType::Ack, SINGLE_ID, None, &[]));

        // Completion was released, not fired
        assert!(events.lock().is_empty());
    }
}
