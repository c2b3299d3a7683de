//! Block checksum: reflected CRC-32 (polynomial 0xEDB88320).
//!
//! Bit-serial on purpose — a lookup table would be faster but the transfer
//! engine only checksums one 512-byte block per command, so the simple form
//! is plenty and keeps the flash footprint down on small targets.

/// Reflected CRC-32 polynomial.
const POLY: u32 = 0xEDB8_8320;

/// Compute the CRC-32 of `buf`: init 0xFFFFFFFF, bit-serial update per byte,
/// final one's complement. Pure and deterministic.
pub fn crc32(buf: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in buf {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLY & mask);
        }
    }
    !crc
}
