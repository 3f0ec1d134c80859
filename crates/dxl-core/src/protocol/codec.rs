//! Packet codec for both protocol versions.
//!
//! The codec turns [`InstructionPacket`]s and [`StatusPacket`]s into complete
//! on-wire frames and back.  Framing details (headers, length fields,
//! checksum/CRC, byte stuffing) live in [`crate::protocol::v1`] and
//! [`crate::protocol::v2`]; this module dispatches on [`ProtocolVersion`] and
//! handles the instruction/error byte that opens every body.
//!
//! # Receiving (for beginners)
//!
//! A serial line delivers bytes, not packets.  The receive loop in the bus
//! master keeps a buffer and repeatedly asks [`probe_status_frame`] what to do
//! with it:
//!
//! - [`FrameProbe::NeedMore`]: read until the buffer holds this many bytes.
//! - [`FrameProbe::Skip`]: the leading bytes cannot start a status frame;
//!   drop them.
//! - [`FrameProbe::Complete`]: a whole frame is buffered; hand exactly that
//!   many bytes to [`decode_status`], which verifies integrity.

use thiserror::Error;
use tracing::trace;

use crate::domain::device::{DeviceId, BROADCAST_ID, MAX_ID};
use crate::protocol::messages::{Instruction, InstructionPacket, ProtocolVersion, StatusPacket};
use crate::protocol::status::DeviceStatus;
use crate::protocol::{v1, v2};

/// Errors that can occur while encoding or decoding a packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// The byte slice is shorter than the frame requires.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The slice does not start with the version's frame marker.
    #[error("frame header not found")]
    MissingHeader,

    /// The id byte is outside the range allowed in this position.
    #[error("invalid device id: 0x{0:02X}")]
    InvalidId(u8),

    /// The length field is smaller than the fixed part of a frame.
    #[error("invalid length field: {0}")]
    InvalidLength(usize),

    /// The received checksum/CRC does not match the recomputed one.
    #[error("integrity check failed: expected 0x{expected:04X}, received 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// The encoded frame would exceed the version's maximum packet size.
    #[error("packet too long: {len} bytes, maximum is {max}")]
    PacketTooLong { len: usize, max: usize },

    /// A parameter does not fit the version's field width.
    #[error("{field} {value} does not fit the field (maximum {max})")]
    FieldOutOfRange {
        field: &'static str,
        value: usize,
        max: usize,
    },

    /// The body opens with an instruction code that is unknown or not allowed
    /// here.
    #[error("unexpected instruction code: 0x{0:02X}")]
    UnexpectedInstruction(u8),
}

/// Verdict of [`probe_status_frame`] on the current receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProbe {
    /// The buffer must hold at least this many bytes before probing again.
    NeedMore(usize),
    /// Drop this many leading bytes; they cannot start a status frame.
    Skip(usize),
    /// The first `n` bytes form one candidate frame.
    Complete(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an instruction packet into a complete frame.
///
/// # Errors
///
/// Returns [`PacketError::InvalidId`] unless the id is addressable or the
/// broadcast id, and [`PacketError::PacketTooLong`] if the frame would not fit.
///
/// # Examples
///
/// ```rust
/// use dxl_core::protocol::{encode_instruction, Instruction, InstructionPacket, ProtocolVersion};
///
/// let ping = InstructionPacket::new(1, Instruction::Ping, vec![]);
/// let frame = encode_instruction(ProtocolVersion::V1, &ping).unwrap();
/// assert_eq!(frame, vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
/// ```
pub fn encode_instruction(
    version: ProtocolVersion,
    packet: &InstructionPacket,
) -> Result<Vec<u8>, PacketError> {
    if !is_target_id(packet.id) {
        return Err(PacketError::InvalidId(packet.id));
    }

    let mut body = Vec::with_capacity(1 + packet.params.len());
    body.push(packet.instruction as u8);
    body.extend_from_slice(&packet.params);
    encode_frame(version, packet.id, &body)
}

/// Decodes one instruction packet from the start of `bytes`.
///
/// Returns the packet and the number of bytes consumed.  Mostly useful for
/// device simulators and bus sniffers.
///
/// # Errors
///
/// Returns [`PacketError`] if the frame is malformed, fails its integrity
/// check, or carries an unknown instruction code.
pub fn decode_instruction(
    version: ProtocolVersion,
    bytes: &[u8],
) -> Result<(InstructionPacket, usize), PacketError> {
    let (id, body, consumed) = decode_frame(version, bytes)?;
    if !is_target_id(id) {
        return Err(PacketError::InvalidId(id));
    }
    let (&code, params) = body
        .split_first()
        .ok_or(PacketError::InvalidLength(body.len()))?;
    let instruction =
        Instruction::try_from(code).map_err(|_| PacketError::UnexpectedInstruction(code))?;
    if instruction == Instruction::Status {
        return Err(PacketError::UnexpectedInstruction(code));
    }

    Ok((
        InstructionPacket::new(id, instruction, params.to_vec()),
        consumed,
    ))
}

/// Encodes a status packet into a complete frame.
///
/// # Errors
///
/// Returns [`PacketError::PacketTooLong`] if the frame would not fit.
pub fn encode_status(
    version: ProtocolVersion,
    packet: &StatusPacket,
) -> Result<Vec<u8>, PacketError> {
    let mut body = Vec::with_capacity(2 + packet.params.len());
    if version == ProtocolVersion::V2 {
        body.push(Instruction::Status as u8);
    }
    body.push(packet.status.bits());
    body.extend_from_slice(&packet.params);
    encode_frame(version, packet.id, &body)
}

/// Decodes one status packet from the start of `bytes`.
///
/// Returns the packet and the number of bytes consumed.  The packet is only
/// returned if its checksum/CRC matches.
///
/// # Errors
///
/// Returns [`PacketError`] if the frame is malformed or fails its integrity
/// check.
///
/// # Examples
///
/// ```rust
/// use dxl_core::protocol::{decode_status, ProtocolVersion};
///
/// // Reply of id 1 to a PING: no error, model 1030, firmware 38
/// let bytes = [0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x07, 0x00, 0x55, 0x00, 0x06, 0x04, 0x26, 0x65, 0x5D];
/// let (status, consumed) = decode_status(ProtocolVersion::V2, &bytes).unwrap();
/// assert_eq!(status.id, 1);
/// assert!(status.status.is_ok());
/// assert_eq!(status.params, vec![0x06, 0x04, 0x26]);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn decode_status(
    version: ProtocolVersion,
    bytes: &[u8],
) -> Result<(StatusPacket, usize), PacketError> {
    let (id, body, consumed) = decode_frame(version, bytes)?;
    if id > MAX_ID && id != BROADCAST_ID {
        return Err(PacketError::InvalidId(id));
    }

    let rest = match version {
        ProtocolVersion::V1 => body.as_slice(),
        ProtocolVersion::V2 => {
            let (&code, rest) = body
                .split_first()
                .ok_or(PacketError::InvalidLength(body.len()))?;
            if code != Instruction::Status as u8 {
                return Err(PacketError::UnexpectedInstruction(code));
            }
            rest
        }
    };
    let (&error, params) = rest
        .split_first()
        .ok_or(PacketError::InvalidLength(body.len()))?;

    Ok((
        StatusPacket::new(id, DeviceStatus(error), params.to_vec()),
        consumed,
    ))
}

/// Inspects the receive buffer for the next status frame.
///
/// Never consumes anything itself; see the module docs for how the verdicts
/// drive a receive loop.
pub fn probe_status_frame(version: ProtocolVersion, buf: &[u8]) -> FrameProbe {
    let verdict = match version {
        ProtocolVersion::V1 => v1::probe_status(buf),
        ProtocolVersion::V2 => v2::probe_status(buf),
    };
    if let FrameProbe::Skip(n) = verdict {
        trace!(skipped = n, "discarding bytes before status frame");
    }
    verdict
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Instruction targets: any addressable id or the broadcast id.
fn is_target_id(id: DeviceId) -> bool {
    id <= MAX_ID || id == BROADCAST_ID
}

fn encode_frame(version: ProtocolVersion, id: DeviceId, body: &[u8]) -> Result<Vec<u8>, PacketError> {
    match version {
        ProtocolVersion::V1 => v1::encode_frame(id, body),
        ProtocolVersion::V2 => v2::encode_frame(id, body),
    }
}

fn decode_frame(
    version: ProtocolVersion,
    bytes: &[u8],
) -> Result<(DeviceId, Vec<u8>, usize), PacketError> {
    match version {
        ProtocolVersion::V1 => v1::decode_frame(bytes),
        ProtocolVersion::V2 => v2::decode_frame(bytes),
    }
}

pub(crate) fn require_len(buf: &[u8], needed: usize) -> Result<(), PacketError> {
    if buf.len() < needed {
        Err(PacketError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}
