//! Link frame format and receive state machine
//!
//! Frame layout (multi-byte fields little-endian):
//!
//! ```text
//! ┌──────┬──────┬────────┬─────────┬───────────┬──────────┬────┐
//! │ sync │ type │ size   │ obj id  │ inst id   │ data     │ cs │
//! │ 0x3C │ 1 B  │ 2 B    │ 4 B     │ 0 or 2 B  │ 0..256 B │ 1B │
//! └──────┴──────┴────────┴─────────┴───────────┴──────────┴────┘
//! ```
//!
//! - `size` counts the whole frame including the checksum byte
//! - `inst id` is present only for multi-instance types; `0xFFFF` requests
//!   every instance (OBJ_REQ only)
//! - `data` is present only for OBJ / OBJ_ACK and is exactly the type's
//!   declared width
//! - `cs` is CRC-8 over every preceding byte of the frame
//!
//! The parser consumes one byte per step and keeps its state across calls;
//! a frame may arrive split across any number of reads. Any malformed byte
//! resets the machine to sync scanning without touching the registry.

use crate::error::{Error, Result};
use crate::link::crc;
use crate::obj::ObjectRegistry;

/// Frame sync byte
pub const SYNC_VAL: u8 = 0x3C;

/// Protocol version tag carried in the high bits of the type byte
pub const TYPE_VER: u8 = 0x20;
/// Mask selecting the version bits of the type byte
pub const TYPE_MASK: u8 = 0xF8;

/// sync + type + size + obj id
pub const MIN_HEADER_LENGTH: usize = 8;
/// Header with the optional instance id
pub const MAX_HEADER_LENGTH: usize = 10;
/// Checksum trailer
pub const CHECKSUM_LENGTH: usize = 1;
/// Largest object payload
pub const MAX_PAYLOAD_LENGTH: usize = 256;
/// Upper bound on a complete frame
pub const MAX_PACKET_LENGTH: usize = MAX_HEADER_LENGTH + MAX_PAYLOAD_LENGTH + CHECKSUM_LENGTH;
/// Smallest complete frame (payload-less, single-instance)
pub const MIN_PACKET_LENGTH: usize = MIN_HEADER_LENGTH + CHECKSUM_LENGTH;

/// Instance id wildcard meaning "every instance of this type"
pub const ALL_INSTANCES: u16 = 0xFFFF;

/// Version-tagged frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Unacknowledged object update
    Obj = TYPE_VER,
    /// Request for an object's current value
    ObjReq = TYPE_VER | 0x01,
    /// Object update requiring an ACK reply
    ObjAck = TYPE_VER | 0x02,
    /// Acknowledgement of an OBJ_ACK
    Ack = TYPE_VER | 0x03,
    /// Negative acknowledgement (unresolvable request)
    Nack = TYPE_VER | 0x04,
}

impl FrameType {
    /// Decode a received type byte; unknown values are a protocol error
    pub fn from_byte(byte: u8) -> Option<Self> {
        if byte & TYPE_MASK != TYPE_VER {
            return None;
        }
        match byte & !TYPE_MASK {
            0x00 => Some(FrameType::Obj),
            0x01 => Some(FrameType::ObjReq),
            0x02 => Some(FrameType::ObjAck),
            0x03 => Some(FrameType::Ack),
            0x04 => Some(FrameType::Nack),
            _ => None,
        }
    }

    /// Whether frames of this type carry an object payload
    pub fn has_payload(self) -> bool {
        matches!(self, FrameType::Obj | FrameType::ObjAck)
    }
}

/// One fully validated frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub obj_id: u32,
    pub inst_id: u16,
    pub data: Vec<u8>,
}

impl Frame {
    /// Whether the frame addresses every instance of its type
    pub fn all_instances(&self) -> bool {
        self.inst_id == ALL_INSTANCES
    }
}

/// Encode one frame into wire bytes
///
/// `inst_id` is `None` for single-instance types, which omit the field
/// entirely.
pub fn encode_frame(
    frame_type: FrameType,
    obj_id: u32,
    inst_id: Option<u16>,
    data: &[u8],
) -> Vec<u8> {
    let inst_len = if inst_id.is_some() { 2 } else { 0 };
    let total = MIN_HEADER_LENGTH + inst_len + data.len() + CHECKSUM_LENGTH;
    debug_assert!(total <= MAX_PACKET_LENGTH);

    let mut buf = Vec::with_capacity(total);
    buf.push(SYNC_VAL);
    buf.push(frame_type as u8);
    buf.extend_from_slice(&(total as u16).to_le_bytes());
    buf.extend_from_slice(&obj_id.to_le_bytes());
    if let Some(id) = inst_id {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    buf.extend_from_slice(data);
    buf.push(crc::update_buf(0, &buf));
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Sync,
    Type,
    Size,
    ObjId,
    InstId,
    Data,
    Checksum,
}

/// Byte-at-a-time receive state machine
///
/// Needs the registry at the OBJID stage to resolve the payload width and
/// whether the instance id field is present. Not safely re-entrant
/// mid-frame; each transport feeds exactly one parser.
pub struct FrameParser {
    state: RxState,
    cs: u8,
    frame_type: FrameType,
    packet_len: usize,
    obj_id: u32,
    inst_id: u16,
    tmp: [u8; 4],
    tmp_count: usize,
    inst_len: usize,
    payload_len: usize,
    data: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser {
            state: RxState::Sync,
            cs: 0,
            frame_type: FrameType::Obj,
            packet_len: 0,
            obj_id: 0,
            inst_id: 0,
            tmp: [0u8; 4],
            tmp_count: 0,
            inst_len: 0,
            payload_len: 0,
            data: Vec::with_capacity(MAX_PAYLOAD_LENGTH),
        }
    }

    /// Drop any partial frame and return to sync scanning
    pub fn reset(&mut self) {
        self.state = RxState::Sync;
        self.tmp_count = 0;
        self.data.clear();
    }

    /// Feed one byte; `Ok(Some(frame))` on frame completion, `Err` on any
    /// malformed field (the parser has already reset itself).
    pub fn push(&mut self, byte: u8, registry: &ObjectRegistry) -> Result<Option<Frame>> {
        match self.step(byte, registry) {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn step(&mut self, byte: u8, registry: &ObjectRegistry) -> Result<Option<Frame>> {
        match self.state {
            RxState::Sync => {
                // Scan for sync; other bytes are discarded silently
                if byte == SYNC_VAL {
                    self.cs = crc::update(0, byte);
                    self.state = RxState::Type;
                }
                Ok(None)
            }
            RxState::Type => {
                let Some(frame_type) = FrameType::from_byte(byte) else {
                    return Err(Error::InvalidPacket(format!(
                        "unknown frame type {:#04x}",
                        byte
                    )));
                };
                self.cs = crc::update(self.cs, byte);
                self.frame_type = frame_type;
                self.tmp_count = 0;
                self.state = RxState::Size;
                Ok(None)
            }
            RxState::Size => {
                self.cs = crc::update(self.cs, byte);
                self.tmp[self.tmp_count] = byte;
                self.tmp_count += 1;
                if self.tmp_count < 2 {
                    return Ok(None);
                }
                self.packet_len = u16::from_le_bytes([self.tmp[0], self.tmp[1]]) as usize;
                if !(MIN_PACKET_LENGTH..=MAX_PACKET_LENGTH).contains(&self.packet_len) {
                    return Err(Error::InvalidPacket(format!(
                        "frame length {} out of bounds",
                        self.packet_len
                    )));
                }
                self.tmp_count = 0;
                self.state = RxState::ObjId;
                Ok(None)
            }
            RxState::ObjId => {
                self.cs = crc::update(self.cs, byte);
                self.tmp[self.tmp_count] = byte;
                self.tmp_count += 1;
                if self.tmp_count < 4 {
                    return Ok(None);
                }
                self.obj_id = u32::from_le_bytes(self.tmp);
                self.resolve_lengths(registry)?;

                let expected =
                    MIN_HEADER_LENGTH + self.inst_len + self.payload_len + CHECKSUM_LENGTH;
                if self.packet_len != expected {
                    return Err(Error::InvalidPacket(format!(
                        "length {} != expected {} for {:#010x}",
                        self.packet_len, expected, self.obj_id
                    )));
                }

                self.inst_id = 0;
                self.tmp_count = 0;
                self.data.clear();
                self.state = if self.inst_len > 0 {
                    RxState::InstId
                } else if self.payload_len > 0 {
                    RxState::Data
                } else {
                    RxState::Checksum
                };
                Ok(None)
            }
            RxState::InstId => {
                self.cs = crc::update(self.cs, byte);
                self.tmp[self.tmp_count] = byte;
                self.tmp_count += 1;
                if self.tmp_count < 2 {
                    return Ok(None);
                }
                self.inst_id = u16::from_le_bytes([self.tmp[0], self.tmp[1]]);
                self.state = if self.payload_len > 0 {
                    RxState::Data
                } else {
                    RxState::Checksum
                };
                Ok(None)
            }
            RxState::Data => {
                self.cs = crc::update(self.cs, byte);
                self.data.push(byte);
                if self.data.len() == self.payload_len {
                    self.state = RxState::Checksum;
                }
                Ok(None)
            }
            RxState::Checksum => {
                if byte != self.cs {
                    return Err(Error::ChecksumError {
                        expected: self.cs,
                        actual: byte,
                    });
                }
                let frame = Frame {
                    frame_type: self.frame_type,
                    obj_id: self.obj_id,
                    inst_id: self.inst_id,
                    data: std::mem::take(&mut self.data),
                };
                self.reset();
                Ok(Some(frame))
            }
        }
    }

    /// Resolve instance-id presence and payload width once the object id is
    /// known.
    ///
    /// Payload-less frames (OBJ_REQ, ACK, NACK) take their header length
    /// from the declared size rather than the catalog: a peer that cannot
    /// resolve the object id NACKs without an instance field, and an
    /// OBJ_REQ for an id unregistered here must still reach dispatch so it
    /// can be NACKed back. Payload-carrying frames for unknown types cannot
    /// be parsed (the width is unknowable) and abort.
    fn resolve_lengths(&mut self, registry: &ObjectRegistry) -> Result<()> {
        if !self.frame_type.has_payload() {
            self.payload_len = 0;
            let inst_len = self.packet_len - MIN_PACKET_LENGTH;
            if inst_len != 0 && inst_len != 2 {
                return Err(Error::InvalidPacket(format!(
                    "bad header length {} for {:#010x}",
                    self.packet_len, self.obj_id
                )));
            }
            self.inst_len = inst_len;
            return Ok(());
        }
        match registry.type_info(self.obj_id) {
            Some(info) => {
                self.inst_len = if info.single_instance { 0 } else { 2 };
                self.payload_len = info.num_bytes;
                Ok(())
            }
            None => Err(Error::UnknownObject {
                obj_id: self.obj_id,
                inst_id: 0,
            }),
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
