//! Transaction engine: one request/response exchange at a time on the bus.
//!
//! [`BusMaster`] owns the transport and the protocol version.  It encodes
//! instruction packets, writes them, and (unless the target is the broadcast
//! id) collects the status packet sent back by the addressed device.
//!
//! # Receive loop (for beginners)
//!
//! The line is shared and noisy: there may be leftover bytes from an earlier
//! exchange, an echo of our own instruction, or a reply from a different
//! device.  The engine keeps a receive buffer and asks the codec what it
//! contains:
//!
//! ```text
//!   ┌──── need more ────► read from transport (until the deadline)
//!   │
//! probe ── skip n ──────► drop n leading bytes
//!   │
//!   └──── complete n ───► verify checksum/CRC ──► StatusPacket or RxCorrupt
//! ```
//!
//! A frame that fails its integrity check is reported as
//! [`CommError::RxCorrupt`] and never retried internally; retry policy
//! belongs to the caller.
//!
//! # Two kinds of failure
//!
//! [`CommError`] means the exchange itself failed: nothing usable came back.
//! A device that answers with a fault bit set (overheating, out of range, …)
//! still completed the exchange, so its [`DeviceStatus`] is returned next to
//! the data and is never turned into a `CommError`.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use dxl_core::protocol::messages::{HEADER_V1, HEADER_V2};
use dxl_core::protocol::params;
use dxl_core::{
    decode_status, encode_instruction, probe_status_frame, DeviceId, DeviceStatus, FrameProbe,
    Instruction, InstructionPacket, PacketError, ProtocolVersion, StatusPacket, BROADCAST_ID,
};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::infrastructure::storage::config::BusConfig;
use crate::infrastructure::transport::{Transport, TransportError};

/// Largest single read issued to the transport.
const READ_CHUNK: usize = 256;

/// Control-table address of the model number on Protocol 1.0 devices.
const MODEL_NUMBER_ADDRESS: u16 = 0;

/// Parameters of the CLEAR instruction that reset the multi-turn position.
const CLEAR_MULTI_TURN: [u8; 5] = [0x01, 0x44, 0x58, 0x4C, 0x22];

/// Failure of a bus exchange.  Closed set; device faults are not in it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommError {
    /// Another transaction holds the bus.
    #[error("port is in use by another transaction")]
    PortBusy,
    /// The transport refused or truncated the instruction packet.
    #[error("failed to transmit instruction packet")]
    TxFail,
    /// The instruction packet could not be encoded (too long, field overflow).
    #[error("instruction packet could not be encoded")]
    TxError,
    /// The transport failed while reading.
    #[error("failed to receive status packet")]
    RxFail,
    /// Nothing arrived before the deadline.
    #[error("no status packet received before the deadline")]
    RxTimeout,
    /// Bytes arrived but did not form a valid status packet.
    #[error("received status packet is corrupt")]
    RxCorrupt,
    /// The instruction does not exist in the active protocol version, or the
    /// request cannot be sent in its current shape.
    #[error("instruction not available")]
    NotAvailable,
}

/// Failure to bring the bus up.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The transport could not be opened.
    #[error("failed to open transport: {0}")]
    Open(#[source] TransportError),

    /// The transport opened but rejected the baud rate; it has been closed.
    #[error("failed to set baud rate {baud_rate}: {source}")]
    BaudRate {
        baud_rate: u32,
        #[source]
        source: TransportError,
    },
}

/// A failed receive, with the sender id when the frame header revealed it.
///
/// Group reads use the id to blame a corrupt reply on the right device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFailure {
    pub error: CommError,
    pub id: Option<DeviceId>,
}

impl RxFailure {
    fn anonymous(error: CommError) -> Self {
        Self { error, id: None }
    }
}

/// Answer to a PING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingInfo {
    /// Model number of the device.
    pub model_number: u16,
    /// Firmware version; Protocol 1.0 devices do not report it.
    pub firmware_version: Option<u8>,
    /// Status byte of the PING reply.
    pub status: DeviceStatus,
}

/// What a FACTORY RESET keeps.  Protocol 1.0 devices always reset everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FactoryResetOption {
    All = 0xFF,
    KeepId = 0x01,
    KeepIdAndBaudRate = 0x02,
}

/// Bus master shared between group aggregators.
pub type SharedBus<T> = Arc<Mutex<BusMaster<T>>>;

/// Owns one bus: its transport, its protocol version and its receive buffer.
pub struct BusMaster<T: Transport> {
    transport: T,
    version: ProtocolVersion,
    rx_buf: Vec<u8>,
}

impl<T: Transport> BusMaster<T> {
    /// Creates a bus master around a closed transport.
    pub fn new(transport: T, version: ProtocolVersion) -> Self {
        Self {
            transport,
            version,
            rx_buf: Vec::new(),
        }
    }

    /// Creates a bus master and opens it with the configured baud rate.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if the transport cannot be opened or configured.
    pub fn from_config(transport: T, config: &BusConfig) -> Result<Self, SetupError> {
        let mut bus = Self::new(transport, config.protocol.version);
        bus.open(config.port.baud_rate)?;
        Ok(bus)
    }

    /// Opens the transport and sets the line speed.
    ///
    /// On failure the transport is left closed.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Open`] or [`SetupError::BaudRate`].
    pub fn open(&mut self, baud_rate: u32) -> Result<(), SetupError> {
        if let Err(source) = self.transport.open() {
            error!(error = %source, "failed to open transport");
            return Err(SetupError::Open(source));
        }
        if let Err(source) = self.transport.set_baud_rate(baud_rate) {
            error!(baud_rate, error = %source, "failed to set baud rate");
            self.transport.close();
            return Err(SetupError::BaudRate { baud_rate, source });
        }
        self.rx_buf.clear();
        info!(version = %self.version, baud_rate, "bus opened");
        Ok(())
    }

    /// Closes the transport.
    pub fn close(&mut self) {
        self.transport.close();
        self.rx_buf.clear();
    }

    /// Wire format spoken on this bus.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Borrows the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrows the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Wraps the bus in the shared handle used by group aggregators.
    pub fn into_shared(self) -> SharedBus<T> {
        Arc::new(Mutex::new(self))
    }

    /// Receive deadline for a status packet of `expected_len` bytes.
    pub fn packet_timeout(&self, expected_len: usize) -> Duration {
        self.transport.packet_timeout(expected_len)
    }

    // ── Low-level exchange ────────────────────────────────────────────────────

    /// Encodes and writes one instruction packet.
    ///
    /// Stale input (bytes that arrived since the last exchange) is discarded
    /// first so it cannot be mistaken for the reply.
    ///
    /// # Errors
    ///
    /// [`CommError::NotAvailable`] if the instruction does not exist in this
    /// protocol version, [`CommError::TxError`] if it cannot be encoded,
    /// [`CommError::TxFail`] if the transport fails.
    pub fn tx_packet(&mut self, packet: &InstructionPacket) -> Result<(), CommError> {
        if !self.version.supports(packet.instruction) {
            debug!(instruction = ?packet.instruction, version = %self.version, "instruction not available");
            return Err(CommError::NotAvailable);
        }
        let frame = encode_instruction(self.version, packet).map_err(encode_failure)?;

        self.rx_buf.clear();
        if let Err(e) = self.transport.clear_read_buffer() {
            warn!(error = %e, "failed to clear receive buffer");
            return Err(CommError::TxFail);
        }
        match self.transport.write_bytes(&frame) {
            Ok(n) if n == frame.len() => {}
            Ok(n) => {
                warn!(written = n, expected = frame.len(), "short write");
                return Err(CommError::TxFail);
            }
            Err(e) => {
                warn!(error = %e, "failed to write instruction packet");
                return Err(CommError::TxFail);
            }
        }

        debug!(id = packet.id, instruction = ?packet.instruction, len = frame.len(), "tx");
        Ok(())
    }

    /// Receives the next valid status packet from any device.
    ///
    /// Bytes that cannot start a status frame are dropped.  Bytes following
    /// the returned frame stay buffered for the next call, so back-to-back
    /// replies of a group read are all collected.
    ///
    /// # Errors
    ///
    /// Returns an [`RxFailure`] carrying [`CommError::RxCorrupt`] for a frame
    /// that fails its integrity check (or is cut off by the deadline),
    /// [`CommError::RxTimeout`] if nothing arrived, [`CommError::RxFail`] if
    /// the transport failed.
    pub fn receive_status(&mut self, deadline: Instant) -> Result<StatusPacket, RxFailure> {
        loop {
            match probe_status_frame(self.version, &self.rx_buf) {
                FrameProbe::Skip(n) => {
                    self.rx_buf.drain(..n);
                }
                FrameProbe::Complete(n) => {
                    let frame: Vec<u8> = self.rx_buf.drain(..n).collect();
                    return match decode_status(self.version, &frame) {
                        Ok((status, _)) => {
                            debug!(id = status.id, error = status.status.bits(), len = n, "rx");
                            Ok(status)
                        }
                        Err(e) => {
                            let id = header_id(self.version, &frame);
                            warn!(error = %e, ?id, "discarding corrupt status packet");
                            Err(RxFailure {
                                error: CommError::RxCorrupt,
                                id,
                            })
                        }
                    };
                }
                FrameProbe::NeedMore(needed) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(self.deadline_failure());
                    }
                    let mut chunk = [0u8; READ_CHUNK];
                    let want = needed.saturating_sub(self.rx_buf.len()).clamp(1, READ_CHUNK);
                    match self.transport.read_bytes(&mut chunk[..want], deadline - now) {
                        Ok(n) => self.rx_buf.extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            warn!(error = %e, "failed to read from transport");
                            return Err(RxFailure::anonymous(CommError::RxFail));
                        }
                    }
                }
            }
        }
    }

    /// Classifies an expired deadline and empties the receive buffer.
    fn deadline_failure(&mut self) -> RxFailure {
        let Some(start) = frame_start(self.version, &self.rx_buf) else {
            trace!(buffered = self.rx_buf.len(), "receive deadline passed with no frame started");
            self.rx_buf.clear();
            return RxFailure::anonymous(CommError::RxTimeout);
        };
        let id = header_id(self.version, &self.rx_buf[start..]);
        warn!(buffered = self.rx_buf.len(), ?id, "receive deadline passed inside a frame");
        self.rx_buf.clear();
        RxFailure {
            error: CommError::RxCorrupt,
            id,
        }
    }

    /// Receives until a status packet from `id` arrives; replies from other
    /// devices are skipped.
    fn receive_from(&mut self, id: DeviceId, deadline: Instant) -> Result<StatusPacket, CommError> {
        loop {
            match self.receive_status(deadline) {
                Ok(status) if status.id == id => return Ok(status),
                Ok(status) => {
                    trace!(expected = id, received = status.id, "ignoring reply from another device");
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    /// Sends one instruction and, unless `id` is the broadcast id, waits for
    /// the reply of `id`.
    ///
    /// Returns `Ok(None)` for broadcast; the receive side is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] if the exchange failed.
    pub fn exchange(
        &mut self,
        id: DeviceId,
        instruction: Instruction,
        params: Vec<u8>,
    ) -> Result<Option<StatusPacket>, CommError> {
        if id == BROADCAST_ID {
            self.instruction_only(id, instruction, params)?;
            return Ok(None);
        }
        self.transact(id, instruction, params).map(Some)
    }

    /// Sends one instruction without waiting for any reply.
    ///
    /// # Errors
    ///
    /// Returns [`CommError`] if the packet could not be sent.
    pub fn instruction_only(
        &mut self,
        id: DeviceId,
        instruction: Instruction,
        params: Vec<u8>,
    ) -> Result<(), CommError> {
        self.tx_packet(&InstructionPacket::new(id, instruction, params))
    }

    fn transact(
        &mut self,
        id: DeviceId,
        instruction: Instruction,
        params: Vec<u8>,
    ) -> Result<StatusPacket, CommError> {
        let reply_len = self
            .version
            .status_packet_len(self.expected_reply_params(instruction, &params));
        self.tx_packet(&InstructionPacket::new(id, instruction, params))?;
        let deadline = Instant::now() + self.transport.packet_timeout(reply_len);
        self.receive_from(id, deadline)
    }

    /// Number of parameter bytes the reply to `instruction` will carry.
    fn expected_reply_params(&self, instruction: Instruction, params: &[u8]) -> usize {
        match (instruction, self.version) {
            (Instruction::Read, ProtocolVersion::V1) => params.get(1).map_or(0, |&len| len.into()),
            (Instruction::Read, ProtocolVersion::V2) => params
                .get(2..4)
                .map_or(0, |len| usize::from(u16::from_le_bytes([len[0], len[1]]))),
            (Instruction::Ping, ProtocolVersion::V2) => 3,
            _ => 0,
        }
    }

    fn command(
        &mut self,
        id: DeviceId,
        instruction: Instruction,
        params: Vec<u8>,
    ) -> Result<DeviceStatus, CommError> {
        Ok(self
            .exchange(id, instruction, params)?
            .map_or(DeviceStatus::OK, |reply| reply.status))
    }

    // ── Single-device helpers ─────────────────────────────────────────────────

    /// Pings one device and reports its model number.
    ///
    /// On Protocol 1.0 the model number is read from the control table with a
    /// second exchange.
    ///
    /// # Errors
    ///
    /// [`CommError::NotAvailable`] for the broadcast id; any exchange failure.
    pub fn ping(&mut self, id: DeviceId) -> Result<PingInfo, CommError> {
        if id == BROADCAST_ID {
            return Err(CommError::NotAvailable);
        }
        let reply = self.transact(id, Instruction::Ping, Vec::new())?;
        match self.version {
            ProtocolVersion::V2 => match reply.params.as_slice() {
                [lo, hi, firmware, ..] => Ok(PingInfo {
                    model_number: u16::from_le_bytes([*lo, *hi]),
                    firmware_version: Some(*firmware),
                    status: reply.status,
                }),
                _ => {
                    warn!(id, len = reply.params.len(), "ping reply too short");
                    Err(CommError::RxCorrupt)
                }
            },
            ProtocolVersion::V1 => {
                let (model_number, _) = self.read_u16(id, MODEL_NUMBER_ADDRESS)?;
                Ok(PingInfo {
                    model_number,
                    firmware_version: None,
                    status: reply.status,
                })
            }
        }
    }

    /// Reads `length` bytes starting at `address`.
    ///
    /// # Errors
    ///
    /// [`CommError::NotAvailable`] for the broadcast id,
    /// [`CommError::RxCorrupt`] if the reply carries a different number of
    /// bytes, any exchange failure.
    pub fn read(
        &mut self,
        id: DeviceId,
        address: u16,
        length: u16,
    ) -> Result<(Vec<u8>, DeviceStatus), CommError> {
        if id == BROADCAST_ID {
            return Err(CommError::NotAvailable);
        }
        let params = params::read(self.version, address, length).map_err(encode_failure)?;
        let reply = self.transact(id, Instruction::Read, params)?;
        if reply.params.len() != usize::from(length) {
            warn!(id, expected = length, received = reply.params.len(), "read reply has wrong length");
            return Err(CommError::RxCorrupt);
        }
        Ok((reply.params, reply.status))
    }

    /// Reads one byte.
    pub fn read_u8(&mut self, id: DeviceId, address: u16) -> Result<(u8, DeviceStatus), CommError> {
        let (data, status) = self.read(id, address, 1)?;
        Ok((params::le_value(&data) as u8, status))
    }

    /// Reads a little-endian 16-bit value.
    pub fn read_u16(&mut self, id: DeviceId, address: u16) -> Result<(u16, DeviceStatus), CommError> {
        let (data, status) = self.read(id, address, 2)?;
        Ok((params::le_value(&data) as u16, status))
    }

    /// Reads a little-endian 32-bit value.
    pub fn read_u32(&mut self, id: DeviceId, address: u16) -> Result<(u32, DeviceStatus), CommError> {
        let (data, status) = self.read(id, address, 4)?;
        Ok((params::le_value(&data), status))
    }

    /// Writes `data` at `address` and waits for the acknowledgement.
    ///
    /// Broadcast writes are not acknowledged and report [`DeviceStatus::OK`].
    pub fn write(&mut self, id: DeviceId, address: u16, data: &[u8]) -> Result<DeviceStatus, CommError> {
        let params = params::write(self.version, address, data).map_err(encode_failure)?;
        self.command(id, Instruction::Write, params)
    }

    /// Writes `data` at `address` without waiting for the acknowledgement.
    pub fn write_only(&mut self, id: DeviceId, address: u16, data: &[u8]) -> Result<(), CommError> {
        let params = params::write(self.version, address, data).map_err(encode_failure)?;
        self.instruction_only(id, Instruction::Write, params)
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, id: DeviceId, address: u16, value: u8) -> Result<DeviceStatus, CommError> {
        self.write(id, address, &[value])
    }

    /// Writes a little-endian 16-bit value.
    pub fn write_u16(&mut self, id: DeviceId, address: u16, value: u16) -> Result<DeviceStatus, CommError> {
        self.write(id, address, &value.to_le_bytes())
    }

    /// Writes a little-endian 32-bit value.
    pub fn write_u32(&mut self, id: DeviceId, address: u16, value: u32) -> Result<DeviceStatus, CommError> {
        self.write(id, address, &value.to_le_bytes())
    }

    /// Stages a write that takes effect on the next [`BusMaster::action`].
    pub fn reg_write(&mut self, id: DeviceId, address: u16, data: &[u8]) -> Result<DeviceStatus, CommError> {
        let params = params::write(self.version, address, data).map_err(encode_failure)?;
        self.command(id, Instruction::RegWrite, params)
    }

    /// Applies staged writes.  Usually sent to the broadcast id.
    pub fn action(&mut self, id: DeviceId) -> Result<DeviceStatus, CommError> {
        self.command(id, Instruction::Action, Vec::new())
    }

    /// Restarts a device (Protocol 2.0 only).
    pub fn reboot(&mut self, id: DeviceId) -> Result<DeviceStatus, CommError> {
        self.command(id, Instruction::Reboot, Vec::new())
    }

    /// Resets the multi-turn position counter (Protocol 2.0 only).
    pub fn clear(&mut self, id: DeviceId) -> Result<DeviceStatus, CommError> {
        self.command(id, Instruction::Clear, CLEAR_MULTI_TURN.to_vec())
    }

    /// Restores the factory control table.
    pub fn factory_reset(
        &mut self,
        id: DeviceId,
        option: FactoryResetOption,
    ) -> Result<DeviceStatus, CommError> {
        let params = match self.version {
            ProtocolVersion::V1 => Vec::new(),
            ProtocolVersion::V2 => vec![option as u8],
        };
        self.command(id, Instruction::FactoryReset, params)
    }
}

/// Acquires a shared bus without waiting.
///
/// A poisoned lock is recovered: the next transmission clears any state the
/// panicking holder left behind.
///
/// # Errors
///
/// Returns [`CommError::PortBusy`] if another caller holds the bus.
pub fn lock_bus<T: Transport>(bus: &SharedBus<T>) -> Result<MutexGuard<'_, BusMaster<T>>, CommError> {
    match bus.try_lock() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::WouldBlock) => Err(CommError::PortBusy),
        Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
    }
}

fn encode_failure(error: PacketError) -> CommError {
    warn!(%error, "cannot encode instruction packet");
    CommError::TxError
}

fn header(version: ProtocolVersion) -> &'static [u8] {
    match version {
        ProtocolVersion::V1 => &HEADER_V1,
        ProtocolVersion::V2 => &HEADER_V2,
    }
}

/// Offset of the first byte that begins a header, or a header cut short by
/// the end of `bytes`.
fn frame_start(version: ProtocolVersion, bytes: &[u8]) -> Option<usize> {
    let header = header(version);
    (0..bytes.len()).find(|&start| {
        let rest = &bytes[start..];
        rest.starts_with(header) || header.starts_with(rest)
    })
}

/// Sender id from a (possibly incomplete) frame that starts with a header.
fn header_id(version: ProtocolVersion, bytes: &[u8]) -> Option<DeviceId> {
    let header = header(version);
    if bytes.starts_with(header) {
        bytes.get(header.len()).copied()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::MockTransport;
    use dxl_core::encode_status;

    fn status_frame(version: ProtocolVersion, id: DeviceId, error: u8, params: &[u8]) -> Vec<u8> {
        encode_status(version, &StatusPacket::new(id, DeviceStatus(error), params.to_vec()))
            .expect("status frame must encode")
    }

    fn opened(version: ProtocolVersion) -> (BusMaster<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let mut bus = BusMaster::new(mock.clone(), version);
        bus.open(57_600).expect("mock opens");
        (bus, mock)
    }

    // ── Setup ────────────────────────────────────────────────────────────────

    #[test]
    fn test_open_sets_baud_rate() {
        let (bus, mock) = opened(ProtocolVersion::V2);
        assert_eq!(bus.transport().baud_rate(), 57_600);
        assert!(mock.is_open());
    }

    #[test]
    fn test_open_failure_is_reported() {
        let mock = MockTransport::new();
        mock.fail_open(true);
        let mut bus = BusMaster::new(mock.clone(), ProtocolVersion::V2);

        let result = bus.open(57_600);

        assert!(matches!(result, Err(SetupError::Open(_))));
        assert!(!mock.is_open());
    }

    #[test]
    fn test_baud_rate_failure_closes_transport() {
        // Arrange
        let mock = MockTransport::new();
        mock.fail_baud_rate(true);
        let mut bus = BusMaster::new(mock.clone(), ProtocolVersion::V2);

        // Act
        let result = bus.open(12_345);

        // Assert – no half-open state is retained
        assert!(matches!(result, Err(SetupError::BaudRate { baud_rate: 12_345, .. })));
        assert!(!mock.is_open());
    }

    #[test]
    fn test_from_config_uses_configured_version_and_baud() {
        let mut config = BusConfig::default();
        config.port.baud_rate = 1_000_000;
        config.protocol.version = ProtocolVersion::V1;

        let bus = BusMaster::from_config(MockTransport::new(), &config).expect("opens");

        assert_eq!(bus.version(), ProtocolVersion::V1);
        assert_eq!(bus.transport().baud_rate(), 1_000_000);
    }

    // ── Single exchanges ─────────────────────────────────────────────────────

    #[test]
    fn test_ping_v2_reports_model_and_firmware() {
        // Arrange
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.push_reply(status_frame(ProtocolVersion::V2, 1, 0, &[0x06, 0x04, 0x26]));

        // Act
        let info = bus.ping(1).expect("ping succeeds");

        // Assert
        assert_eq!(info.model_number, 1030);
        assert_eq!(info.firmware_version, Some(0x26));
        assert_eq!(
            mock.last_written(),
            Some(vec![0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E])
        );
    }

    #[test]
    fn test_ping_v1_reads_model_number() {
        let (mut bus, mock) = opened(ProtocolVersion::V1);
        mock.push_reply(status_frame(ProtocolVersion::V1, 3, 0, &[]));
        mock.push_reply(status_frame(ProtocolVersion::V1, 3, 0, &[0x0C, 0x00]));

        let info = bus.ping(3).expect("ping succeeds");

        assert_eq!(info.model_number, 12);
        assert_eq!(info.firmware_version, None);
        assert_eq!(mock.written().len(), 2);
    }

    #[test]
    fn test_read_u32_assembles_little_endian() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.push_reply(status_frame(ProtocolVersion::V2, 1, 0, &[0x00, 0x08, 0x00, 0x00]));

        let (value, status) = bus.read_u32(1, 132).expect("read succeeds");

        assert_eq!(value, 2048);
        assert!(status.is_ok());
    }

    #[test]
    fn test_device_fault_is_returned_with_data() {
        let (mut bus, mock) = opened(ProtocolVersion::V1);
        mock.push_reply(status_frame(ProtocolVersion::V1, 1, DeviceStatus::OVERHEATING, &[0x3C]));

        let (value, status) = bus.read_u8(1, 43).expect("exchange succeeded");

        assert_eq!(value, 0x3C);
        assert!(status.contains(DeviceStatus::OVERHEATING));
    }

    #[test]
    fn test_stale_bytes_are_cleared_before_transmit() {
        // Arrange – a complete, valid reply is already waiting before the request
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.inject_rx(&status_frame(ProtocolVersion::V2, 1, 0, &[0xAA]));
        mock.push_reply(status_frame(ProtocolVersion::V2, 1, 0, &[0x55]));

        // Act
        let (value, _) = bus.read_u8(1, 64).expect("read succeeds");

        // Assert – the stale frame never surfaces
        assert_eq!(value, 0x55);
        assert_eq!(mock.clear_count(), 1);
    }

    #[test]
    fn test_noise_before_reply_is_skipped() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        let mut reply = vec![0x00, 0xFF, 0x12, 0xFF, 0xFF];
        reply.extend(status_frame(ProtocolVersion::V2, 1, 0, &[0x01]));
        mock.push_reply(reply);

        let (value, _) = bus.read_u8(1, 64).expect("read succeeds");

        assert_eq!(value, 1);
    }

    #[test]
    fn test_reply_from_other_device_is_ignored() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        let mut reply = status_frame(ProtocolVersion::V2, 9, 0, &[0x09]);
        reply.extend(status_frame(ProtocolVersion::V2, 2, 0, &[0x02]));
        mock.push_reply(reply);

        let (value, _) = bus.read_u8(2, 64).expect("read succeeds");

        assert_eq!(value, 2);
    }

    #[test]
    fn test_frame_split_across_reads_is_reassembled() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.set_read_chunk(1);
        mock.push_reply(status_frame(ProtocolVersion::V2, 1, 0, &[0xFF, 0xFF, 0xFD, 0x00]));

        let (data, _) = bus.read(1, 132, 4).expect("read succeeds");

        assert_eq!(data, vec![0xFF, 0xFF, 0xFD, 0x00]);
    }

    // ── Failures ─────────────────────────────────────────────────────────────

    #[test]
    fn test_corrupt_reply_is_rx_corrupt() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        let mut reply = status_frame(ProtocolVersion::V2, 1, 0, &[1, 2, 3, 4]);
        reply[9] ^= 0x10;
        mock.push_reply(reply);

        assert_eq!(bus.read_u32(1, 132), Err(CommError::RxCorrupt));
    }

    #[test]
    fn test_no_reply_is_rx_timeout() {
        let (mut bus, _mock) = opened(ProtocolVersion::V2);
        assert_eq!(bus.ping(1), Err(CommError::RxTimeout));
    }

    #[test]
    fn test_partial_reply_is_rx_corrupt() {
        let (mut bus, mock) = opened(ProtocolVersion::V1);
        let reply = status_frame(ProtocolVersion::V1, 1, 0, &[1, 2, 3, 4]);
        mock.push_reply(reply[..7].to_vec());

        assert_eq!(bus.read_u32(1, 36), Err(CommError::RxCorrupt));
    }

    #[test]
    fn test_line_noise_without_header_is_rx_timeout() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.push_reply(vec![0x00]);

        assert_eq!(bus.ping(1), Err(CommError::RxTimeout));
    }

    #[test]
    fn test_noise_then_cut_header_is_rx_corrupt() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.push_reply(vec![0x00, 0xFF, 0xFF, 0xFD]);

        assert_eq!(bus.ping(1), Err(CommError::RxCorrupt));
    }

    #[test]
    fn test_wrong_read_length_is_rx_corrupt() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.push_reply(status_frame(ProtocolVersion::V2, 1, 0, &[1, 2]));

        assert_eq!(bus.read_u32(1, 132), Err(CommError::RxCorrupt));
    }

    #[test]
    fn test_write_failure_is_tx_fail() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.fail_write(true);

        assert_eq!(bus.write_u8(1, 64, 1), Err(CommError::TxFail));
    }

    #[test]
    fn test_read_failure_is_rx_fail() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.fail_read(true);

        assert_eq!(bus.action(1), Err(CommError::RxFail));
    }

    #[test]
    fn test_v1_address_overflow_is_tx_error() {
        let (mut bus, mock) = opened(ProtocolVersion::V1);

        assert_eq!(bus.write_u32(1, 564, 0), Err(CommError::TxError));
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_v2_only_instruction_on_v1_is_not_available() {
        let (mut bus, mock) = opened(ProtocolVersion::V1);

        assert_eq!(bus.reboot(1), Err(CommError::NotAvailable));
        assert_eq!(bus.clear(1), Err(CommError::NotAvailable));
        assert!(mock.written().is_empty());
    }

    // ── Broadcast ────────────────────────────────────────────────────────────

    #[test]
    fn test_broadcast_never_reads() {
        // Arrange – a spurious frame arrives right after the write
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        mock.push_reply(status_frame(ProtocolVersion::V2, 1, 0, &[]));

        // Act
        let status = bus.action(BROADCAST_ID).expect("broadcast succeeds");

        // Assert – the frame is still waiting, untouched
        assert!(status.is_ok());
        assert!(mock.pending_rx() > 0);
    }

    #[test]
    fn test_broadcast_read_is_not_available() {
        let (mut bus, _mock) = opened(ProtocolVersion::V2);
        assert_eq!(bus.read(BROADCAST_ID, 0, 2), Err(CommError::NotAvailable));
        assert_eq!(bus.ping(BROADCAST_ID), Err(CommError::NotAvailable));
    }

    #[test]
    fn test_factory_reset_option_only_on_v2() {
        let (mut bus, mock) = opened(ProtocolVersion::V2);
        bus.factory_reset(BROADCAST_ID, FactoryResetOption::KeepId).expect("sent");

        let frame = mock.last_written().expect("written");
        assert_eq!(frame[7], Instruction::FactoryReset as u8);
        assert_eq!(frame[8], 0x01);
    }

    // ── Shared handle ────────────────────────────────────────────────────────

    #[test]
    fn test_lock_bus_reports_port_busy_while_held() {
        let (bus, _mock) = opened(ProtocolVersion::V2);
        let shared = bus.into_shared();

        let _held = lock_bus(&shared).expect("first lock succeeds");

        assert!(matches!(lock_bus(&shared), Err(CommError::PortBusy)));
    }

    #[test]
    fn test_header_id_reads_partial_frames() {
        assert_eq!(header_id(ProtocolVersion::V1, &[0xFF, 0xFF, 0x07]), Some(7));
        assert_eq!(header_id(ProtocolVersion::V2, &[0xFF, 0xFF, 0xFD, 0x00]), None);
        assert_eq!(header_id(ProtocolVersion::V2, &[0xFF, 0xFF, 0xFD, 0x00, 0x03]), Some(3));
        assert_eq!(header_id(ProtocolVersion::V2, &[0x00, 0xFF]), None);
    }

    #[test]
    fn test_frame_start_finds_full_or_cut_headers() {
        assert_eq!(frame_start(ProtocolVersion::V2, &[0x00, 0x12]), None);
        assert_eq!(frame_start(ProtocolVersion::V2, &[0xFF, 0x12]), None);
        assert_eq!(frame_start(ProtocolVersion::V2, &[0x00, 0xFF, 0xFF]), Some(1));
        assert_eq!(frame_start(ProtocolVersion::V2, &[0xFF, 0xFF, 0xFD, 0x00, 0x01]), Some(0));
        assert_eq!(frame_start(ProtocolVersion::V1, &[0x05, 0xFF, 0xFF, 0x01, 0x02]), Some(1));
    }
}
