//! Relay bridging the registry to a second peer with echo suppression
//!
//! Forwards every local object update to the peer as an unacked send, and
//! routes inbound peer updates into the registry. While applying an inbound
//! update the forwarding hook for that instance is detached, so a received
//! update is never echoed straight back to its sender; an independent local
//! mutation afterwards is forwarded normally. The local link-stats type used
//! for the session's own liveness is excluded in both directions.

use crate::link::engine::LinkEngine;
use crate::link::frame::{Frame, FrameType};
use crate::obj::notify::{Handler, Token};
use crate::obj::{ObjectEvent, ObjectRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Protocol relay over one peer link
pub struct ObjectRelay {
    engine: Arc<LinkEngine>,
    registry: Arc<ObjectRegistry>,
    excluded_obj_id: u32,
    /// Forwarding-hook tokens per instance, removed while applying inbound
    /// updates for that instance
    hooks: Arc<Mutex<HashMap<(u32, u16), Token>>>,
    forward: Handler<ObjectEvent>,
    new_instance_token: Token,
}

impl ObjectRelay {
    /// Attach a relay to an engine.
    ///
    /// Subscribes to the `updated` notification of every currently
    /// registered instance and to `new_instance` for future ones, excluding
    /// the given local link-stats type.
    pub fn new(engine: Arc<LinkEngine>, excluded_obj_id: u32) -> Self {
        let registry = Arc::clone(engine.registry());
        let hooks = Arc::new(Mutex::new(HashMap::new()));

        let forward: Handler<ObjectEvent> = {
            let engine = Arc::clone(&engine);
            Arc::new(move |event: &ObjectEvent| {
                if let Err(e) = engine.send_object(event.obj_id, event.inst_id, false, false) {
                    log::debug!(
                        "Relay forward of {:#010x}:{} failed: {}",
                        event.obj_id,
                        event.inst_id,
                        e
                    );
                }
            })
        };

        for (obj_id, inst_id) in registry.instance_keys() {
            if obj_id == excluded_obj_id {
                continue;
            }
            if let Ok(token) = registry.subscribe_updated(obj_id, inst_id, Arc::clone(&forward)) {
                hooks.lock().insert((obj_id, inst_id), token);
            }
        }

        let new_instance_token = {
            let registry = Arc::clone(&registry);
            let hooks = Arc::clone(&hooks);
            let forward = Arc::clone(&forward);
            let excluded = excluded_obj_id;
            engine
                .registry()
                .subscribe_new_instance(Arc::new(move |event: &ObjectEvent| {
                    if event.obj_id == excluded {
                        return;
                    }
                    if let Ok(token) = registry.subscribe_updated(
                        event.obj_id,
                        event.inst_id,
                        Arc::clone(&forward),
                    ) {
                        hooks.lock().insert((event.obj_id, event.inst_id), token);
                    }
                }))
        };

        log::debug!(
            "Relay attached, {} instances hooked (excluding {:#010x})",
            hooks.lock().len(),
            excluded_obj_id
        );

        ObjectRelay {
            engine,
            registry,
            excluded_obj_id,
            hooks,
            forward,
            new_instance_token,
        }
    }

    pub fn engine(&self) -> &Arc<LinkEngine> {
        &self.engine
    }

    /// Feed bytes received from the peer
    pub fn process_input(&self, data: &[u8]) {
        for frame in self.engine.parse_input(data) {
            self.dispatch_frame(frame);
        }
    }

    /// Peer transport closed: reset receive state via the engine
    pub fn handle_transport_closed(&self) {
        self.engine.handle_transport_closed();
    }

    fn dispatch_frame(&self, frame: Frame) {
        // The local stats type never crosses the relay in either direction
        if frame.obj_id == self.excluded_obj_id {
            log::trace!("Relay dropping excluded object {:#010x}", frame.obj_id);
            return;
        }

        match frame.frame_type {
            FrameType::Obj => {
                if frame.all_instances() {
                    self.engine.count_rx_error("all-instances OBJ");
                    return;
                }
                if self.apply_suppressed(&frame).is_ok() {
                    self.engine.complete_transaction(frame.obj_id, true);
                } else {
                    self.engine.count_rx_error("OBJ for unknown object");
                }
            }
            FrameType::ObjAck => {
                if frame.all_instances() {
                    self.engine.count_rx_error("all-instances OBJ_ACK");
                    return;
                }
                if self.apply_suppressed(&frame).is_ok() {
                    if let Err(e) = self.engine.transmit_ack(frame.obj_id, frame.inst_id) {
                        log::warn!("Relay failed to send ACK for {:#010x}: {}", frame.obj_id, e);
                    }
                } else {
                    self.engine.count_rx_error("OBJ_ACK for unknown object");
                }
            }
            // Requests are serviced from the local registry exactly as in
            // the base engine; ACK/NACK resolve pending transactions
            _ => self.engine.dispatch_frame(frame),
        }
    }

    /// Apply an inbound update with the instance's forwarding hook detached
    fn apply_suppressed(&self, frame: &Frame) -> crate::error::Result<()> {
        let key = (frame.obj_id, frame.inst_id);
        let removed = self.hooks.lock().remove(&key);
        if let Some(token) = removed {
            self.registry
                .unsubscribe_updated(frame.obj_id, frame.inst_id, token);
        }

        let result = self.engine.apply_received(frame);

        if removed.is_some() {
            if let Ok(token) = self.registry.subscribe_updated(
                frame.obj_id,
                frame.inst_id,
                Arc::clone(&self.forward),
            ) {
                self.hooks.lock().insert(key, token);
            }
        }
        result
    }
}

impl Drop for ObjectRelay {
    fn drop(&mut self) {
        self.registry
            .unsubscribe_new_instance(self.new_instance_token);
        for ((obj_id, inst_id), token) in self.hooks.lock().drain() {
            self.registry.unsubscribe_updated(obj_id, inst_id, token);
        }
    }
}
