//! # dxl-core
//!
//! Shared library for the actuator bus driver containing the packet codec for
//! both wire formats, the integrity algorithms, the instruction set and the
//! device status model.
//!
//! It has zero dependencies on OS APIs, serial ports or timing sources; the
//! bus-master side (`dxl-master`) owns all I/O.
//!
//! # Architecture overview (for beginners)
//!
//! A single host ("bus master") talks to many actuators sharing one
//! half-duplex serial line.  Every exchange is an *instruction packet* sent by
//! the host followed, for most instructions, by a *status packet* sent back by
//! the addressed device.  Two incompatible packet layouts exist:
//!
//! - **Protocol 1.0** – 2-byte header, 8-bit length, 8-bit additive checksum.
//! - **Protocol 2.0** – 4-byte header, 16-bit length, CRC-16 and byte
//!   stuffing so that payload bytes can never fake a header.
//!
//! This crate defines:
//!
//! - **`domain`** – device identifiers and the reserved broadcast id.
//! - **`protocol`** – how bytes travel over the bus: framing, stuffing,
//!   checksums, instruction codes, status bits and parameter blocks.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `dxl_core::ProtocolVersion` instead of `dxl_core::protocol::messages::ProtocolVersion`.
pub use domain::device::{is_addressable, DeviceId, BROADCAST_ID, MAX_ID};
pub use protocol::codec::{
    decode_instruction, decode_status, encode_instruction, encode_status, probe_status_frame,
    FrameProbe, PacketError,
};
pub use protocol::messages::{Instruction, InstructionPacket, ProtocolVersion, StatusPacket};
pub use protocol::status::DeviceStatus;
