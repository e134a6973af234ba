//! Table-driven CRC-8 for link frames
//!
//! Polynomial 0x07, initial value 0, no reflection, no final XOR. Computed
//! incrementally over every frame byte from the sync byte through the last
//! data byte.

const POLY: u8 = 0x07;

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u8; 256] = build_table();

/// Fold one byte into a running CRC
#[inline]
pub fn update(crc: u8, byte: u8) -> u8 {
    CRC_TABLE[(crc ^ byte) as usize]
}

/// CRC of a whole buffer starting from `crc`
pub fn update_buf(mut crc: u8, data: &[u8]) -> u8 {
    for &b in data {
        crc = update(crc, b);
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // CRC-8/ATM check value for "123456789"
        assert_eq!(update_buf(0, b"123456789"), 0xF4);
    }

    #[test]
    fn test_incremental_matches_buffer() {
        let data = [0x3C, 0x22, 0x0B, 0x00, 0xEF, 0xBE, 0xAD, 0xDE];
        let mut crc = 0;
        for &b in &data {
            crc = update(crc, b);
        }
        assert_eq!(crc, update_buf(0, &data));
    }

    #[test]
    fn test_single_bit_sensitivity() {
        let data = [0x3C, 0x20, 0x0D, 0x00, 0x00, 0x10, 0x00, 0x00, 0xAA, 0xBB];
        let reference = update_buf(0, &data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data;
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    update_buf(0, &corrupted),
                    reference,
                    "flip at byte {} bit {} went undetected",
                    byte,
                    bit
                );
            }
        }
    }
}
