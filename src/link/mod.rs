//! Framed binary link protocol
//!
//! Turns a raw byte stream into typed object updates with acknowledgement
//! and request/response semantics. See [`frame`] for the wire format and
//! [`engine`] for dispatch and transaction tracking.

pub mod crc;
pub mod engine;
pub mod frame;

pub use engine::{ComStats, LinkEngine, TransactionEvent};
pub use frame::{Frame, FrameParser, FrameType, ALL_INSTANCES, MAX_PACKET_LENGTH, SYNC_VAL};
