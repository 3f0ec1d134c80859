//! Packet types, instruction codes and protocol constants shared by both wire
//! formats.
//!
//! The constants follow the Protocol 1.0 and Protocol 2.0 documents of the
//! actuator family; they must match exactly for devices to understand us.

use serde::{Deserialize, Serialize};

use crate::domain::device::DeviceId;
use crate::protocol::status::DeviceStatus;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Frame marker that opens every Protocol 1.0 packet.
pub const HEADER_V1: [u8; 2] = [0xFF, 0xFF];

/// Frame marker (plus reserved byte) that opens every Protocol 2.0 packet.
pub const HEADER_V2: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// Largest packet a Protocol 1.0 device accepts or emits, in bytes.
pub const MAX_PACKET_LEN_V1: usize = 250;

/// Largest packet a Protocol 2.0 device accepts or emits, in bytes.
pub const MAX_PACKET_LEN_V2: usize = 1024;

/// Smallest possible Protocol 1.0 status packet: header, id, length, error,
/// checksum.
pub const MIN_STATUS_LEN_V1: usize = 6;

/// Smallest possible Protocol 2.0 status packet: header, id, length,
/// instruction, error, CRC.
pub const MIN_STATUS_LEN_V2: usize = 11;

// ── Protocol version ──────────────────────────────────────────────────────────

/// Wire format spoken on the bus.
///
/// The choice is fixed for the lifetime of a bus master; devices speaking the
/// other format ignore our packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// 2-byte header, 8-bit fields, additive checksum.
    #[serde(rename = "1.0")]
    V1,
    /// 4-byte header, 16-bit fields, CRC-16, byte stuffing.
    #[serde(rename = "2.0")]
    V2,
}

impl ProtocolVersion {
    /// Returns `true` if devices speaking this version implement `instruction`.
    ///
    /// Protocol 1.0 has no sync read, bulk write, fast sync, reboot or clear.
    pub fn supports(self, instruction: Instruction) -> bool {
        match self {
            ProtocolVersion::V1 => matches!(
                instruction,
                Instruction::Ping
                    | Instruction::Read
                    | Instruction::Write
                    | Instruction::RegWrite
                    | Instruction::Action
                    | Instruction::FactoryReset
                    | Instruction::SyncWrite
                    | Instruction::BulkRead
            ),
            ProtocolVersion::V2 => instruction != Instruction::Status,
        }
    }

    /// Size of a status packet carrying `params_len` parameter bytes, before
    /// any byte stuffing.
    pub fn status_packet_len(self, params_len: usize) -> usize {
        match self {
            ProtocolVersion::V1 => MIN_STATUS_LEN_V1 + params_len,
            ProtocolVersion::V2 => MIN_STATUS_LEN_V2 + params_len,
        }
    }

    /// Largest packet this version allows on the wire.
    pub fn max_packet_len(self) -> usize {
        match self {
            ProtocolVersion::V1 => MAX_PACKET_LEN_V1,
            ProtocolVersion::V2 => MAX_PACKET_LEN_V2,
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVersion::V1 => f.write_str("1.0"),
            ProtocolVersion::V2 => f.write_str("2.0"),
        }
    }
}

// ── Instruction codes ─────────────────────────────────────────────────────────

/// All instruction codes understood by the devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    FactoryReset = 0x06,
    Reboot = 0x08,
    Clear = 0x10,
    /// Marks a Protocol 2.0 status packet; never sent by the host.
    Status = 0x55,
    SyncRead = 0x82,
    SyncWrite = 0x83,
    FastSyncRead = 0x8A,
    FastSyncWrite = 0x8B,
    BulkRead = 0x92,
    BulkWrite = 0x93,
}

impl TryFrom<u8> for Instruction {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(Instruction::Ping),
            0x02 => Ok(Instruction::Read),
            0x03 => Ok(Instruction::Write),
            0x04 => Ok(Instruction::RegWrite),
            0x05 => Ok(Instruction::Action),
            0x06 => Ok(Instruction::FactoryReset),
            0x08 => Ok(Instruction::Reboot),
            0x10 => Ok(Instruction::Clear),
            0x55 => Ok(Instruction::Status),
            0x82 => Ok(Instruction::SyncRead),
            0x83 => Ok(Instruction::SyncWrite),
            0x8A => Ok(Instruction::FastSyncRead),
            0x8B => Ok(Instruction::FastSyncWrite),
            0x92 => Ok(Instruction::BulkRead),
            0x93 => Ok(Instruction::BulkWrite),
            _ => Err(()),
        }
    }
}

// ── Packets ───────────────────────────────────────────────────────────────────

/// A request sent by the host to one device or to the broadcast id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPacket {
    /// Target device, or [`crate::BROADCAST_ID`].
    pub id: DeviceId,
    /// Operation the device(s) must perform.
    pub instruction: Instruction,
    /// Instruction parameters, unstuffed.
    pub params: Vec<u8>,
}

impl InstructionPacket {
    /// Creates a packet from its logical fields.
    pub fn new(id: DeviceId, instruction: Instruction, params: Vec<u8>) -> Self {
        Self {
            id,
            instruction,
            params,
        }
    }
}

/// A reply sent by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    /// Device that produced the reply.
    pub id: DeviceId,
    /// Device-reported error/alarm byte.
    pub status: DeviceStatus,
    /// Reply parameters (read data, ping information, …), unstuffed.
    pub params: Vec<u8>,
}

impl StatusPacket {
    /// Creates a reply from its logical fields.
    pub fn new(id: DeviceId, status: DeviceStatus, params: Vec<u8>) -> Self {
        Self { id, status, params }
    }
}
