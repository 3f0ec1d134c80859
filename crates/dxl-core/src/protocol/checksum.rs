//! Integrity algorithms for both wire formats.
//!
//! - Protocol 1.0: 8-bit additive checksum, the one's complement of the sum of
//!   every byte after the header.
//! - Protocol 2.0: CRC-16 with polynomial `0x8005`, initial value `0`, no
//!   input/output reflection, computed over every byte from the header up to
//!   (excluding) the CRC field.

use crc::{Crc, CRC_16_UMTS};

/// Protocol 2.0 CRC: polynomial `0x8005`, init `0`, unreflected, no final XOR.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_UMTS);

/// Protocol 1.0 checksum over `bytes` (id, length, instruction/error and
/// parameters).
///
/// # Examples
///
/// ```rust
/// use dxl_core::protocol::checksum::checksum;
///
/// // PING to id 1: FF FF 01 02 01 FB
/// assert_eq!(checksum(&[0x01, 0x02, 0x01]), 0xFB);
/// ```
pub fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Protocol 2.0 CRC over `bytes`, from the header up to the CRC field.
///
/// # Examples
///
/// ```rust
/// use dxl_core::protocol::checksum::crc16;
///
/// // PING to id 1: FF FF FD 00 01 03 00 01 | 19 4E
/// let crc = crc16(&[0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01]);
/// assert_eq!(crc.to_le_bytes(), [0x19, 0x4E]);
/// ```
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}
