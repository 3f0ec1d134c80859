//! Protocol 1.0 framing.
//!
//! Wire format:
//! ```text
//! [0xFF][0xFF][id:1][len:1][instruction|error:1][params:N][checksum:1]
//! ```
//! `len = N + 2`.  The checksum covers every byte from `id` to the last
//! parameter.

use crate::domain::device::DeviceId;
use crate::protocol::checksum::checksum;
use crate::protocol::codec::{require_len, FrameProbe, PacketError};
use crate::protocol::messages::{HEADER_V1, MAX_PACKET_LEN_V1, MIN_STATUS_LEN_V1};

/// Bytes before the body: header, id, length.
const PREFIX_LEN: usize = 4;

/// Highest id byte a status frame may carry; larger values mean the scanner
/// locked onto payload bytes rather than a real header.
const MAX_STATUS_ID: u8 = 0xFD;

/// Builds a complete frame around `body` (instruction or error byte followed
/// by the parameters).
///
/// # Errors
///
/// Returns [`PacketError::PacketTooLong`] if the frame would exceed
/// [`MAX_PACKET_LEN_V1`].
pub fn encode_frame(id: DeviceId, body: &[u8]) -> Result<Vec<u8>, PacketError> {
    let total = PREFIX_LEN + body.len() + 1;
    if total > MAX_PACKET_LEN_V1 {
        return Err(PacketError::PacketTooLong {
            len: total,
            max: MAX_PACKET_LEN_V1,
        });
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&HEADER_V1);
    buf.push(id);
    buf.push((body.len() + 1) as u8);
    buf.extend_from_slice(body);
    buf.push(checksum(&buf[2..]));
    Ok(buf)
}

/// Parses one frame from the start of `bytes`.
///
/// Returns the id, the body and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`PacketError`] if the header is missing, the length field is
/// impossible, the data is truncated, or the checksum does not match.
pub fn decode_frame(bytes: &[u8]) -> Result<(DeviceId, Vec<u8>, usize), PacketError> {
    require_len(bytes, PREFIX_LEN + 2)?;
    if bytes[..2] != HEADER_V1 {
        return Err(PacketError::MissingHeader);
    }

    let id = bytes[2];
    let len = bytes[3] as usize;
    if len < 2 {
        return Err(PacketError::InvalidLength(len));
    }
    let total = PREFIX_LEN + len;
    require_len(bytes, total)?;

    let expected = checksum(&bytes[2..total - 1]);
    let actual = bytes[total - 1];
    if expected != actual {
        return Err(PacketError::ChecksumMismatch {
            expected: u16::from(expected),
            actual: u16::from(actual),
        });
    }

    Ok((id, bytes[PREFIX_LEN..total - 1].to_vec(), total))
}

/// Incremental scanner for status frames; see [`FrameProbe`].
pub fn probe_status(buf: &[u8]) -> FrameProbe {
    if buf.len() < MIN_STATUS_LEN_V1 {
        return FrameProbe::NeedMore(MIN_STATUS_LEN_V1);
    }

    match buf.windows(HEADER_V1.len()).position(|w| w == HEADER_V1) {
        // Keep the last byte: it may be the first half of a header.
        None => FrameProbe::Skip(buf.len() - 1),
        Some(0) => {
            let id = buf[2];
            let len = buf[3] as usize;
            let error = buf[4];
            let total = PREFIX_LEN + len;
            if id > MAX_STATUS_ID || len < 2 || total > MAX_PACKET_LEN_V1 || error > 0x7F {
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
