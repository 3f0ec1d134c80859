//! Protocol 2.0 framing and byte stuffing.
//!
//! Wire format:
//! ```text
//! [0xFF][0xFF][0xFD][0x00][id:1][len:2 LE][instruction:1][error:1?][params:N][crc:2 LE]
//! ```
//! `len` counts everything after itself: the (stuffed) body plus the CRC.
//! The CRC covers every on-wire byte from the header to the last parameter.
//!
//! # Byte stuffing (for beginners)
//!
//! The sequence `FF FF FD` is the frame marker.  If it appears inside the
//! body, a receiver that lost sync could mistake it for the start of a new
//! packet.  The sender therefore inserts an extra `FD` after every
//! `FF FF FD` it finds in the body; the receiver removes it again.  Stuffing
//! changes the `len` field and the CRC, so both are computed on the stuffed
//! bytes.

use crate::domain::device::{DeviceId, BROADCAST_ID, MAX_ID};
use crate::protocol::checksum::crc16;
use crate::protocol::codec::{require_len, FrameProbe, PacketError};
use crate::protocol::messages::{
    Instruction, HEADER_V2, MAX_PACKET_LEN_V2, MIN_STATUS_LEN_V2,
};

/// Bytes before the body: header, reserved, id, 16-bit length.
const PREFIX_LEN: usize = 7;

/// Sequence that must be escaped inside a body.
const STUFF_PATTERN: [u8; 3] = [0xFF, 0xFF, 0xFD];

/// Escape byte inserted after each [`STUFF_PATTERN`].
const STUFF_BYTE: u8 = 0xFD;

/// Inserts an `FD` after every `FF FF FD` in `body`.
///
/// # Examples
///
/// ```rust
/// use dxl_core::protocol::v2::stuff;
///
/// assert_eq!(stuff(&[0x03, 0xFF, 0xFF, 0xFD]), vec![0x03, 0xFF, 0xFF, 0xFD, 0xFD]);
/// ```
pub fn stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 3);
    for (i, &byte) in body.iter().enumerate() {
        out.push(byte);
        if i >= 2 && body[i - 2..=i] == STUFF_PATTERN {
            out.push(STUFF_BYTE);
        }
    }
    out
}

/// Removes the `FD` that [`stuff`] inserted after every `FF FF FD`.
pub fn unstuff(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        out.push(bytes[i]);
        let escaped =
            i >= 2 && bytes[i - 2..=i] == STUFF_PATTERN && bytes.get(i + 1) == Some(&STUFF_BYTE);
        i += if escaped { 2 } else { 1 };
    }
    out
}

/// Builds a complete frame around `body` (instruction, optional error byte and
/// parameters, all unstuffed).
///
/// # Errors
///
/// Returns [`PacketError::PacketTooLong`] if the stuffed frame would exceed
/// [`MAX_PACKET_LEN_V2`].
pub fn encode_frame(id: DeviceId, body: &[u8]) -> Result<Vec<u8>, PacketError> {
    let stuffed = stuff(body);
    let len_field = stuffed.len() + 2;
    let total = PREFIX_LEN + len_field;
    if total > MAX_PACKET_LEN_V2 {
        return Err(PacketError::PacketTooLong {
            len: total,
            max: MAX_PACKET_LEN_V2,
        });
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&HEADER_V2);
    buf.push(id);
    buf.extend_from_slice(&(len_field as u16).to_le_bytes());
    buf.extend_from_slice(&stuffed);
    let crc = crc16(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Parses one frame from the start of `bytes`.
///
/// Returns the id, the unstuffed body and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`PacketError`] if the header is missing, the length field is
/// impossible, the data is truncated, or the CRC does not match.
pub fn decode_frame(bytes: &[u8]) -> Result<(DeviceId, Vec<u8>, usize), PacketError> {
    require_len(bytes, PREFIX_LEN + 3)?;
    if bytes[..HEADER_V2.len()] != HEADER_V2 {
        return Err(PacketError::MissingHeader);
    }

    let id = bytes[4];
    let len = u16::from_le_bytes([bytes[5], bytes[6]]) as usize;
    if len < 3 {
        return Err(PacketError::InvalidLength(len));
    }
    let total = PREFIX_LEN + len;
    require_len(bytes, total)?;

    let expected = crc16(&bytes[..total - 2]);
    let actual = u16::from_le_bytes([bytes[total - 2], bytes[total - 1]]);
    if expected != actual {
        return Err(PacketError::ChecksumMismatch { expected, actual });
    }

    Ok((id, unstuff(&bytes[PREFIX_LEN..total - 2]), total))
}

/// Incremental scanner for status frames; see [`FrameProbe`].
///
/// The broadcast id is accepted because merged fast-sync replies are sent
/// from it.
pub fn probe_status(buf: &[u8]) -> FrameProbe {
    if buf.len() < MIN_STATUS_LEN_V2 {
        return FrameProbe::NeedMore(MIN_STATUS_LEN_V2);
    }

    match buf.windows(STUFF_PATTERN.len()).position(|w| w == STUFF_PATTERN) {
        // Keep the last two bytes: they may be the start of a header.
        None => FrameProbe::Skip(buf.len() - 2),
        Some(0) => {
            let reserved = buf[3];
            let id = buf[4];
            let len = u16::from_le_bytes([buf[5], buf[6]]) as usize;
            let instruction = buf[7];
            let total = PREFIX_LEN + len;
            let id_ok = id <= MAX_ID || id == BROADCAST_ID;
            if reserved != 0x00
                || !id_ok
                || len < 4
                || total > MAX_PACKET_LEN_V2
                || instruction != Instruction::Status as u8
            {
                return FrameProbe::Skip(1);
            }
            if buf.len() < total {
                FrameProbe::NeedMore(total)
            } else {
                FrameProbe::Complete(total)
            }
        }
        Some(offset) => FrameProbe::Skip(offset),
    }
}
