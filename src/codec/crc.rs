//! 16-bit integrity checksum over frame bodies.
//!
//! CRC-16/MODBUS, transmitted big-endian. The checksum always covers the
//! body only, never the header.

use crc16::{State, MODBUS};

/// Compute the 2-byte checksum for a body.
pub fn checksum(body: &[u8]) -> [u8; 2] {
    State::<MODBUS>::calculate(body).to_be_bytes()
}

/// Verify a body against its transmitted checksum bytes.
pub fn verify(body: &[u8], crc: &[u8]) -> bool {
    crc.len() == 2 && checksum(body) == [crc[0], crc[1]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_roundtrip() {
        let body = b"hello roomwire";
        let crc = checksum(body);
        assert!(verify(body, &crc));
    }

    #[test]
    fn test_checksum_detects_change() {
        let body = b"hello roomwire".to_vec();
        let crc = checksum(&body);

        let mut corrupted = body.clone();
        corrupted[3] ^= 0x01;
        assert!(!verify(&corrupted, &crc));
    }

    #[test]
    fn test_checksum_detects_any_single_bit_flip() {
        let body: Vec<u8> = (0u8..64).collect();
        let crc = checksum(&body);

        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut flipped = body.clone();
                flipped[byte] ^= 1 << bit;
                assert!(
                    !verify(&flipped, &crc),
                    "flip at byte {} bit {} went undetected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_verify_rejects_short_crc() {
        assert!(!verify(b"data", &[0x12]));
        assert!(!verify(b"data", &[]));
    }
}
