//! Device-reported status byte.
//!
//! Every status packet carries one byte in which the device reports faults.
//! A non-zero byte does **not** mean the exchange failed: the packet arrived
//! intact, the device simply has something to say (it is overheating, the
//! requested value was out of range, …).  Communication failures are a
//! different error class owned by the bus master.
//!
//! The two protocol versions use the byte differently:
//!
//! ```text
//! Protocol 1.0   bit: 7    6     5     4     3     2     1     0
//!                     -  INSTR OVLD  CHKS  RANGE HEAT  ANGLE VOLT
//!
//! Protocol 2.0   bit: 7    6..0
//!                   ALERT  error number (1..=7)
//! ```

use serde::{Deserialize, Serialize};

use crate::protocol::messages::ProtocolVersion;

/// Raw status/error byte of a status packet, kept as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceStatus(pub u8);

impl DeviceStatus {
    // Protocol 1.0 fault bits.
    pub const INPUT_VOLTAGE: u8 = 1 << 0;
    pub const ANGLE_LIMIT: u8 = 1 << 1;
    pub const OVERHEATING: u8 = 1 << 2;
    pub const RANGE: u8 = 1 << 3;
    pub const CHECKSUM: u8 = 1 << 4;
    pub const OVERLOAD: u8 = 1 << 5;
    pub const INSTRUCTION: u8 = 1 << 6;

    /// Protocol 2.0 hardware alarm bit.  The device keeps running but a
    /// hardware error is latched in its control table.
    pub const ALERT: u8 = 1 << 7;

    // Protocol 2.0 error numbers (low seven bits).
    pub const RESULT_FAIL: u8 = 1;
    pub const INSTRUCTION_ERROR: u8 = 2;
    pub const CRC_ERROR: u8 = 3;
    pub const DATA_RANGE_ERROR: u8 = 4;
    pub const DATA_LENGTH_ERROR: u8 = 5;
    pub const DATA_LIMIT_ERROR: u8 = 6;
    pub const ACCESS_ERROR: u8 = 7;

    /// A status byte with no fault reported.
    pub const OK: DeviceStatus = DeviceStatus(0);

    /// Returns the raw bitmask.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if no bit is set.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every bit in `mask` is set.
    pub fn contains(self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    /// Returns `true` if the Protocol 2.0 hardware alarm bit is set.
    pub fn has_alert(self) -> bool {
        self.contains(Self::ALERT)
    }

    /// Protocol 2.0 error number (alert bit masked off); `0` means none.
    pub fn error_number(self) -> u8 {
        self.0 & !Self::ALERT
    }

    /// Human-readable description of every fault reported, interpreted for
    /// `version`.  Returns an empty vector when the byte is clear.
    pub fn describe(self, version: ProtocolVersion) -> Vec<&'static str> {
        match version {
            ProtocolVersion::V1 => V1_BITS
                .iter()
                .filter(|(bit, _)| self.contains(*bit))
                .map(|(_, text)| *text)
                .collect(),
            ProtocolVersion::V2 => {
                let mut out = Vec::new();
                if self.has_alert() {
                    out.push("hardware error status has been changed");
                }
                match self.error_number() {
                    0 => {}
                    Self::RESULT_FAIL => out.push("failed to process the instruction packet"),
                    Self::INSTRUCTION_ERROR => out.push("undefined instruction or action without reg_write"),
                    Self::CRC_ERROR => out.push("CRC of the sent packet does not match"),
                    Self::DATA_RANGE_ERROR => out.push("data to be written is out of range"),
                    Self::DATA_LENGTH_ERROR => out.push("data to be written is shorter than the register"),
                    Self::DATA_LIMIT_ERROR => out.push("data to be written is outside the configured limit"),
                    Self::ACCESS_ERROR => out.push("register is read-only, write-only or locked"),
                    _ => out.push("unknown error number"),
                }
                out
            }
        }
    }
}

const V1_BITS: [(u8, &str); 7] = [
    (DeviceStatus::INPUT_VOLTAGE, "input voltage error"),
    (DeviceStatus::ANGLE_LIMIT, "angle limit error"),
    (DeviceStatus::OVERHEATING, "overheat error"),
    (DeviceStatus::RANGE, "out of range error"),
    (DeviceStatus::CHECKSUM, "checksum error"),
    (DeviceStatus::OVERLOAD, "overload error"),
    (DeviceStatus::INSTRUCTION, "instruction code error"),
];

impl From<u8> for DeviceStatus {
    fn from(value: u8) -> Self {
        DeviceStatus(value)
    }
}
