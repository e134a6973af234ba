//! Link-stats objects exchanged by the telemetry monitor
//!
//! Two single-instance types with the same layout: `DeviceLinkStats` is
//! written by the remote device, `GroundLinkStats` by the local side. Their
//! periodic acked exchange doubles as the liveness handshake, so the relay
//! excludes the local type from forwarding.
//!
//! Payload layout (17 bytes, little-endian):
//!
//! | field        | size | notes                      |
//! |--------------|------|----------------------------|
//! | status       | 1    | [`LinkStatus`]             |
//! | tx_data_rate | 4    | f32, bytes/s               |
//! | rx_data_rate | 4    | f32, bytes/s               |
//! | tx_failures  | 4    | u32                        |
//! | rx_failures  | 4    | u32                        |

use crate::obj::TypeDescriptor;

/// Type id of the device-side (remote) link stats object
pub const DEVICE_LINK_STATS_ID: u32 = 0x1A2B_3C40;
/// Type id of the ground-side (local) link stats object
pub const GROUND_LINK_STATS_ID: u32 = 0x1A2B_3C50;

/// Serialized width of a link-stats payload
pub const LINK_STATS_NUM_BYTES: usize = 17;

/// Connection phase advertised in the stats payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LinkStatus {
    #[default]
    Disconnected = 0,
    HandshakeReq = 1,
    HandshakeAck = 2,
    Connected = 3,
}

impl LinkStatus {
    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => LinkStatus::HandshakeReq,
            2 => LinkStatus::HandshakeAck,
            3 => LinkStatus::Connected,
            _ => LinkStatus::Disconnected,
        }
    }
}

/// Typed view of a link-stats payload
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkStats {
    pub status: LinkStatus,
    pub tx_data_rate: f32,
    pub rx_data_rate: f32,
    pub tx_failures: u32,
    pub rx_failures: u32,
}

impl LinkStats {
    pub fn to_bytes(&self) -> [u8; LINK_STATS_NUM_BYTES] {
        let mut out = [0u8; LINK_STATS_NUM_BYTES];
        out[0] = self.status as u8;
        out[1..5].copy_from_slice(&self.tx_data_rate.to_le_bytes());
        out[5..9].copy_from_slice(&self.rx_data_rate.to_le_bytes());
        out[9..13].copy_from_slice(&self.tx_failures.to_le_bytes());
        out[13..17].copy_from_slice(&self.rx_failures.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LINK_STATS_NUM_BYTES {
            return None;
        }
        Some(LinkStats {
            status: LinkStatus::from_byte(bytes[0]),
            tx_data_rate: f32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            rx_data_rate: f32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
            tx_failures: u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]),
            rx_failures: u32::from_le_bytes([bytes[13], bytes[14], bytes[15], bytes[16]]),
        })
    }
}

/// Descriptor for the device-side stats type
pub fn device_link_stats_descriptor() -> TypeDescriptor {
    TypeDescriptor::new(
        DEVICE_LINK_STATS_ID,
        "DeviceLinkStats",
        true,
        LINK_STATS_NUM_BYTES,
    )
}

/// Descriptor for the ground-side stats type
pub fn ground_link_stats_descriptor() -> TypeDescriptor {
    TypeDescriptor::new(
        GROUND_LINK_STATS_ID,
        "GroundLinkStats",
        true,
        LINK_STATS_NUM_BYTES,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let stats = LinkStats {
            status: LinkStatus::Connected,
            tx_data_rate: 1250.5,
            rx_data_rate: 312.25,
            tx_failures: 3,
            rx_failures: 1,
        };
        let bytes = stats.to_bytes();
        assert_eq!(LinkStats::from_bytes(&bytes), Some(stats));
    }

    #[test]
    fn test_default_is_disconnected_zeroes() {
        // A zero-filled registry instance decodes to the default view
        let decoded = LinkStats::from_bytes(&[0u8; LINK_STATS_NUM_BYTES]).unwrap();
        assert_eq!(decoded, LinkStats::default());
        assert_eq!(decoded.status, LinkStatus::Disconnected);
    }

    #[test]
    fn test_unknown_status_maps_to_disconnected() {
        let mut bytes = [0u8; LINK_STATS_NUM_BYTES];
        bytes[0] = 0x7F;
        assert_eq!(
            LinkStats::from_bytes(&bytes).unwrap().status,
            LinkStatus::Disconnected
        );
    }
}
