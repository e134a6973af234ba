//! Per-type metadata: access, acknowledgement and update-mode policy
//!
//! Every registered object type carries one `Metadata` record, held as the
//! payload of its meta-object so peers can read and reconfigure it over the
//! link. The in-memory form is a plain named-field struct; the packed binary
//! layout exists only in `to_bytes`/`from_bytes` at the serialization
//! boundary.
//!
//! Wire layout (7 bytes, little-endian):
//!
//! ```text
//! ┌───────┬──────────────────┬───────────────┬────────────────┐
//! │ flags │ flight period u16│ gcs period u16│ log period u16 │
//! └───────┴──────────────────┴───────────────┴────────────────┘
//! ```
//!
//! Flag bits:
//!
//! | bit(s) | meaning                                  |
//! |--------|------------------------------------------|
//! | 0      | flight access (0 = rw, 1 = ro)           |
//! | 1      | gcs access (0 = rw, 1 = ro)              |
//! | 2      | flight telemetry acked                   |
//! | 3      | gcs telemetry acked                      |
//! | 4-5    | flight update mode                       |
//! | 6-7    | gcs update mode                          |

/// Serialized metadata width in bytes
pub const METADATA_NUM_BYTES: usize = 7;

const FLT_ACCESS_SHIFT: u8 = 0;
const GCS_ACCESS_SHIFT: u8 = 1;
const FLT_ACKED_SHIFT: u8 = 2;
const GCS_ACKED_SHIFT: u8 = 3;
const FLT_MODE_SHIFT: u8 = 4;
const GCS_MODE_SHIFT: u8 = 6;
const MODE_MASK: u8 = 0x3;

/// Access level for object transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Object may be written by the peer
    #[default]
    ReadWrite = 0,
    /// Object is read-only for the peer
    ReadOnly = 1,
}

/// How an object's telemetry updates are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Updated only by an explicit call
    Manual = 0,
    /// Updated at a fixed period
    Periodic = 1,
    /// Updated whenever the data changes
    #[default]
    OnChange = 2,
    /// Updated on change, rate-limited to the period
    Throttled = 3,
}

impl UpdateMode {
    fn from_bits(bits: u8) -> Self {
        match bits & MODE_MASK {
            0 => UpdateMode::Manual,
            1 => UpdateMode::Periodic,
            2 => UpdateMode::OnChange,
            _ => UpdateMode::Throttled,
        }
    }
}

/// Update and acknowledgement policy for one object type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub flight_access: AccessMode,
    pub gcs_access: AccessMode,
    pub flight_telemetry_acked: bool,
    pub gcs_telemetry_acked: bool,
    pub flight_update_mode: UpdateMode,
    pub gcs_update_mode: UpdateMode,
    /// Update period for the flight side, ms (periodic/throttled modes)
    pub flight_update_period: u16,
    /// Update period for the GCS side, ms
    pub gcs_update_period: u16,
    /// Update period for logging, ms
    pub logging_update_period: u16,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            flight_access: AccessMode::ReadWrite,
            gcs_access: AccessMode::ReadWrite,
            flight_telemetry_acked: true,
            gcs_telemetry_acked: true,
            flight_update_mode: UpdateMode::OnChange,
            gcs_update_mode: UpdateMode::OnChange,
            flight_update_period: 0,
            gcs_update_period: 0,
            logging_update_period: 0,
        }
    }
}

impl Metadata {
    /// Fixed metadata carried by meta-objects themselves (read-only, manual)
    pub fn meta_object_defaults() -> Self {
        Metadata {
            flight_access: AccessMode::ReadOnly,
            gcs_access: AccessMode::ReadOnly,
            flight_telemetry_acked: false,
            gcs_telemetry_acked: false,
            flight_update_mode: UpdateMode::Manual,
            gcs_update_mode: UpdateMode::Manual,
            flight_update_period: 0,
            gcs_update_period: 0,
            logging_update_period: 0,
        }
    }

    /// Encode to the fixed 7-byte wire layout
    pub fn to_bytes(&self) -> [u8; METADATA_NUM_BYTES] {
        let mut flags = 0u8;
        flags |= (self.flight_access as u8) << FLT_ACCESS_SHIFT;
        flags |= (self.gcs_access as u8) << GCS_ACCESS_SHIFT;
        flags |= (self.flight_telemetry_acked as u8) << FLT_ACKED_SHIFT;
        flags |= (self.gcs_telemetry_acked as u8) << GCS_ACKED_SHIFT;
        flags |= (self.flight_update_mode as u8) << FLT_MODE_SHIFT;
        flags |= (self.gcs_update_mode as u8) << GCS_MODE_SHIFT;

        let mut out = [0u8; METADATA_NUM_BYTES];
        out[0] = flags;
        out[1..3].copy_from_slice(&self.flight_update_period.to_le_bytes());
        out[3..5].copy_from_slice(&self.gcs_update_period.to_le_bytes());
        out[5..7].copy_from_slice(&self.logging_update_period.to_le_bytes());
        out
    }

    /// Decode from the fixed 7-byte wire layout
    ///
    /// Returns `None` if the buffer is too short.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < METADATA_NUM_BYTES {
            return None;
        }
        let flags = bytes[0];
        Some(Metadata {
            flight_access: if flags & (1 << FLT_ACCESS_SHIFT) != 0 {
                AccessMode::ReadOnly
            } else {
                AccessMode::ReadWrite
            },
            gcs_access: if flags & (1 << GCS_ACCESS_SHIFT) != 0 {
                AccessMode::ReadOnly
            } else {
                AccessMode::ReadWrite
            },
            flight_telemetry_acked: flags & (1 << FLT_ACKED_SHIFT) != 0,
            gcs_telemetry_acked: flags & (1 << GCS_ACKED_SHIFT) != 0,
            flight_update_mode: UpdateMode::from_bits(flags >> FLT_MODE_SHIFT),
            gcs_update_mode: UpdateMode::from_bits(flags >> GCS_MODE_SHIFT),
            flight_update_period: u16::from_le_bytes([bytes[1], bytes[2]]),
            gcs_update_period: u16::from_le_bytes([bytes[3], bytes[4]]),
            logging_update_period: u16::from_le_bytes([bytes[5], bytes[6]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_metadata() {
        let meta = Metadata::default();
        assert_eq!(meta.flight_access, AccessMode::ReadWrite);
        assert_eq!(meta.gcs_access, AccessMode::ReadWrite);
        assert!(meta.flight_telemetry_acked);
        assert!(meta.gcs_telemetry_acked);
        assert_eq!(meta.flight_update_mode, UpdateMode::OnChange);
        assert_eq!(meta.gcs_update_mode, UpdateMode::OnChange);
        assert_eq!(meta.flight_update_period, 0);
    }

    #[test]
    fn test_round_trip() {
        let meta = Metadata {
            flight_access: AccessMode::ReadOnly,
            gcs_access: AccessMode::ReadWrite,
            flight_telemetry_acked: false,
            gcs_telemetry_acked: true,
            flight_update_mode: UpdateMode::Periodic,
            gcs_update_mode: UpdateMode::Throttled,
            flight_update_period: 500,
            gcs_update_period: 1000,
            logging_update_period: 0xBEEF,
        };
        let bytes = meta.to_bytes();
        assert_eq!(bytes.len(), METADATA_NUM_BYTES);
        assert_eq!(Metadata::from_bytes(&bytes), Some(meta));
    }

    #[test]
    fn test_flag_bit_layout() {
        // ro flight access, gcs acked, flight periodic, gcs throttled
        let meta = Metadata {
            flight_access: AccessMode::ReadOnly,
            gcs_access: AccessMode::ReadWrite,
            flight_telemetry_acked: false,
            gcs_telemetry_acked: true,
            flight_update_mode: UpdateMode::Periodic,
            gcs_update_mode: UpdateMode::Throttled,
            flight_update_period: 0,
            gcs_update_period: 0,
            logging_update_period: 0,
        };
        let flags = meta.to_bytes()[0];
        assert_eq!(flags, 0b1101_1001);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert_eq!(Metadata::from_bytes(&[0u8; 6]), None);
    }
}
