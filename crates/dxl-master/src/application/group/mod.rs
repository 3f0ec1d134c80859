//! Group aggregators: many devices, one bus transaction.
//!
//! Reading the position of twelve actuators one by one costs twelve
//! round-trips.  The group instructions batch them: the host sends a single
//! packet naming every device and every device answers in turn (sync/bulk
//! read), or a single merged reply comes back (fast sync read), or nobody
//! answers at all (sync/bulk write).
//!
//! # Structure
//!
//! All six group kinds share one engine, [`GroupCore`], tagged with a
//! [`GroupKind`].  The typed façades in [`sync`], [`bulk`] and [`fast_sync`]
//! expose only the operations that make sense for their kind.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!            add/change/remove            tx_packet             rx_packet
//!   Empty ───────────────────► Building ───────────► Serialized ─────────► Exchanged
//!     ▲                           ▲                                            │
//!     │        clear_param        │          add/change/remove                 │
//!     └───────────────────────────┴────────────────────────────────────────────┘
//! ```
//!
//! The instruction parameters are rebuilt only when an entry changed since the
//! last transmission (`is_param_changed`); retransmitting an unchanged group
//! reuses the cached buffer.  Every transmission discards the per-device
//! results of the previous exchange, so stale data is never reported as fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dxl_core::protocol::params;
use dxl_core::{
    is_addressable, DeviceId, DeviceStatus, Instruction, InstructionPacket, ProtocolVersion,
    StatusPacket, BROADCAST_ID,
};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::application::bus_master::{lock_bus, BusMaster, CommError, RxFailure, SharedBus};
use crate::infrastructure::transport::Transport;

pub mod bulk;
pub mod fast_sync;
pub mod sync;

pub use bulk::{GroupBulkRead, GroupBulkWrite};
pub use fast_sync::{GroupFastSyncRead, GroupFastSyncWrite};
pub use sync::{GroupSyncRead, GroupSyncWrite};

/// Bytes a fast-sync reply adds around each device's data: error, id, CRC.
const FAST_SYNC_OVERHEAD: usize = 4;

/// Misuse of a group's parameter list.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// The id is already in the group; entries are never overwritten by add.
    #[error("device {0} is already in the group")]
    DuplicateId(DeviceId),

    /// The id is not in the group.
    #[error("device {0} is not in the group")]
    UnknownId(DeviceId),

    /// The id cannot be addressed individually (broadcast or reserved).
    #[error("device id {0} cannot be addressed individually")]
    InvalidId(DeviceId),

    /// The data to write does not match the window length.
    #[error("data for device {id} is {actual} bytes, expected {expected}")]
    DataLength {
        id: DeviceId,
        expected: usize,
        actual: usize,
    },

    /// The requested window was not part of the validated reply.
    #[error("no validated data for device {id} at address {address}, length {length}")]
    DataUnavailable {
        id: DeviceId,
        address: u16,
        length: u16,
    },

    /// Integers can only be assembled from 1, 2 or 4 bytes.
    #[error("cannot assemble an integer from {0} bytes")]
    UnsupportedWidth(u16),
}

/// Which group instruction an aggregator issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    SyncRead,
    SyncWrite,
    BulkRead,
    BulkWrite,
    FastSyncRead,
    FastSyncWrite,
}

impl GroupKind {
    /// Instruction code sent on the wire.
    pub fn instruction(self) -> Instruction {
        match self {
            GroupKind::SyncRead => Instruction::SyncRead,
            GroupKind::SyncWrite => Instruction::SyncWrite,
            GroupKind::BulkRead => Instruction::BulkRead,
            GroupKind::BulkWrite => Instruction::BulkWrite,
            GroupKind::FastSyncRead => Instruction::FastSyncRead,
            GroupKind::FastSyncWrite => Instruction::FastSyncWrite,
        }
    }

    /// Returns `true` if devices answer the instruction.
    pub fn expects_reply(self) -> bool {
        !matches!(self, GroupKind::SyncWrite | GroupKind::BulkWrite)
    }

    /// Returns `true` if every entry carries bytes to write.
    pub fn carries_data(self) -> bool {
        matches!(
            self,
            GroupKind::SyncWrite | GroupKind::BulkWrite | GroupKind::FastSyncWrite
        )
    }

    /// Returns `true` if all replies arrive merged into one packet.
    pub fn is_fast(self) -> bool {
        matches!(self, GroupKind::FastSyncRead | GroupKind::FastSyncWrite)
    }
}

/// One device's slot in a group.
#[derive(Debug, Clone)]
struct Entry {
    address: u16,
    length: u16,
    data: Vec<u8>,
    received: Vec<u8>,
    status: DeviceStatus,
    result: Option<Result<(), CommError>>,
}

impl Entry {
    fn new(address: u16, length: u16, data: Vec<u8>) -> Self {
        Self {
            address,
            length,
            data,
            received: Vec::new(),
            status: DeviceStatus::OK,
            result: None,
        }
    }

    fn reset_rx(&mut self) {
        self.received.clear();
        self.status = DeviceStatus::OK;
        self.result = None;
    }

    fn fail(&mut self, error: CommError) {
        self.received.clear();
        self.result = Some(Err(error));
    }
}

/// Shared engine behind every group façade.
///
/// Only the façades build one; reach it through their `core()` accessor.
///
/// ```compile_fail
/// use dxl_core::ProtocolVersion;
/// use dxl_master::application::bus_master::BusMaster;
/// use dxl_master::application::group::{GroupCore, GroupKind};
/// use dxl_master::infrastructure::transport::mock::MockTransport;
///
/// let bus = BusMaster::new(MockTransport::new(), ProtocolVersion::V2).into_shared();
/// let _core = GroupCore::new(bus, GroupKind::SyncRead, 132, 4);
/// ```
pub struct GroupCore<T: Transport> {
    bus: SharedBus<T>,
    kind: GroupKind,
    address: u16,
    length: u16,
    order: Vec<DeviceId>,
    entries: HashMap<DeviceId, Entry>,
    param: Vec<u8>,
    is_param_changed: bool,
}

impl<T: Transport> GroupCore<T> {
    /// Creates an empty group.  `address` and `length` describe the shared
    /// window of sync kinds and are ignored by bulk kinds.
    pub(crate) fn new(bus: SharedBus<T>, kind: GroupKind, address: u16, length: u16) -> Self {
        Self {
            bus,
            kind,
            address,
            length,
            order: Vec::new(),
            entries: HashMap::new(),
            param: Vec::new(),
            is_param_changed: false,
        }
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    /// Member ids in insertion (wire) order.
    pub fn ids(&self) -> &[DeviceId] {
        &self.order
    }

    /// Returns `true` if the cached parameters are out of date.
    pub fn is_param_changed(&self) -> bool {
        self.is_param_changed
    }

    /// Parameters sent by the last transmission.
    pub fn param_buffer(&self) -> &[u8] {
        &self.param
    }

    // ── Parameter list ────────────────────────────────────────────────────────

    fn add_windowed(&mut self, id: DeviceId, data: &[u8]) -> Result<(), GroupError> {
        self.add_entry(id, self.address, self.length, data)
    }

    fn add_entry(&mut self, id: DeviceId, address: u16, length: u16, data: &[u8]) -> Result<(), GroupError> {
        if !is_addressable(id) {
            return Err(GroupError::InvalidId(id));
        }
        if self.entries.contains_key(&id) {
            return Err(GroupError::DuplicateId(id));
        }
        self.check_data(id, length, data)?;

        self.entries.insert(id, Entry::new(address, length, data.to_vec()));
        self.order.push(id);
        self.is_param_changed = true;
        Ok(())
    }

    fn change_windowed(&mut self, id: DeviceId, data: &[u8]) -> Result<(), GroupError> {
        self.change_entry(id, self.address, self.length, data)
    }

    fn change_entry(&mut self, id: DeviceId, address: u16, length: u16, data: &[u8]) -> Result<(), GroupError> {
        if !self.entries.contains_key(&id) {
            return Err(GroupError::UnknownId(id));
        }
        self.check_data(id, length, data)?;

        if let Some(entry) = self.entries.get_mut(&id) {
            *entry = Entry::new(address, length, data.to_vec());
        }
        self.is_param_changed = true;
        Ok(())
    }

    fn check_data(&self, id: DeviceId, length: u16, data: &[u8]) -> Result<(), GroupError> {
        if self.kind.carries_data() && data.len() != usize::from(length) {
            return Err(GroupError::DataLength {
                id,
                expected: usize::from(length),
                actual: data.len(),
            });
        }
        Ok(())
    }

    /// Removes one device.
    ///
    /// # Errors
    ///
    /// Returns [`GroupError::UnknownId`] if `id` is not in the group.
    pub fn remove_param(&mut self, id: DeviceId) -> Result<(), GroupError> {
        if self.entries.remove(&id).is_none() {
            return Err(GroupError::UnknownId(id));
        }
        self.order.retain(|&member| member != id);
        self.is_param_changed = true;
        Ok(())
    }

    /// Removes every device and drops the cached parameters.  Idempotent.
    pub fn clear_param(&mut self) {
        self.order.clear();
        self.entries.clear();
        self.param.clear();
        self.is_param_changed = false;
    }

    // ── Transactions ──────────────────────────────────────────────────────────

    /// Broadcasts the group instruction.
    ///
    /// # Errors
    ///
    /// [`CommError::PortBusy`] if the bus is held elsewhere,
    /// [`CommError::NotAvailable`] for an empty group or an instruction the
    /// protocol version lacks, otherwise any transmit failure.
    pub fn tx_packet(&mut self) -> Result<(), CommError> {
        let shared = Arc::clone(&self.bus);
        let mut bus = lock_bus(&shared)?;
        self.tx_locked(&mut bus)
    }

    /// Collects the replies to the last transmission.
    ///
    /// Returns `Ok` only if every device answered correctly; otherwise the
    /// first failure in insertion order.  Per-device outcomes stay available
    /// through [`GroupCore::result`].
    pub fn rx_packet(&mut self) -> Result<(), CommError> {
        let shared = Arc::clone(&self.bus);
        let mut bus = lock_bus(&shared)?;
        self.rx_locked(&mut bus)
    }

    /// Transmits and collects while holding the bus once.
    pub fn tx_rx_packet(&mut self) -> Result<(), CommError> {
        let shared = Arc::clone(&self.bus);
        let mut bus = lock_bus(&shared)?;
        self.tx_locked(&mut bus)?;
        self.rx_locked(&mut bus)
    }

    fn tx_locked(&mut self, bus: &mut BusMaster<T>) -> Result<(), CommError> {
        let instruction = self.kind.instruction();
        if !bus.version().supports(instruction) || self.order.is_empty() {
            return Err(CommError::NotAvailable);
        }

        for entry in self.entries.values_mut() {
            entry.reset_rx();
        }
        if self.is_param_changed || self.param.is_empty() {
            self.make_param(bus.version())?;
        }

        bus.tx_packet(&InstructionPacket::new(BROADCAST_ID, instruction, self.param.clone()))
    }

    /// Rebuilds the cached instruction parameters from the entries.
    fn make_param(&mut self, version: ProtocolVersion) -> Result<(), CommError> {
        let entries = &self.entries;
        let members = self
            .order
            .iter()
            .filter_map(|id| entries.get(id).map(|entry| (*id, entry)));

        let built = match self.kind {
            GroupKind::SyncRead | GroupKind::FastSyncRead => {
                params::sync_read(version, self.address, self.length, &self.order)
            }
            GroupKind::SyncWrite | GroupKind::FastSyncWrite => params::sync_write(
                version,
                self.address,
                self.length,
                members.map(|(id, entry)| (id, entry.data.as_slice())),
            ),
            GroupKind::BulkRead => params::bulk_read(
                version,
                members.map(|(id, entry)| (id, entry.address, entry.length)),
            ),
            GroupKind::BulkWrite => params::bulk_write(
                version,
                members.map(|(id, entry)| (id, entry.address, entry.data.as_slice())),
            ),
        };

        match built {
            Ok(param) => {
                debug!(kind = ?self.kind, devices = self.order.len(), len = param.len(), "group parameters rebuilt");
                self.param = param;
                self.is_param_changed = false;
                Ok(())
            }
            Err(e) => {
                warn!(kind = ?self.kind, error = %e, "cannot build group parameters");
                Err(CommError::TxError)
            }
        }
    }

    fn rx_locked(&mut self, bus: &mut BusMaster<T>) -> Result<(), CommError> {
        if !self.kind.expects_reply() {
            return Ok(());
        }
        if !bus.version().supports(self.kind.instruction()) || self.order.is_empty() {
            return Err(CommError::NotAvailable);
        }

        if self.kind.is_fast() {
            self.receive_merged(bus);
        } else {
            self.receive_each(bus);
        }
        self.overall_result()
    }

    /// One reply per device, in any order; routed by sender id.
    fn receive_each(&mut self, bus: &mut BusMaster<T>) {
        let version = bus.version();
        let mut pending = self.order.clone();
        let mut deadline = Instant::now() + bus.packet_timeout(self.expected_len(version, &pending));

        while !pending.is_empty() {
            match bus.receive_status(deadline) {
                Ok(reply) => {
                    let Some(position) = pending.iter().position(|&id| id == reply.id) else {
                        trace!(id = reply.id, "ignoring reply from device outside the group");
                        continue;
                    };
                    pending.remove(position);
                    self.store_reply(reply);
                    deadline = Instant::now() + bus.packet_timeout(self.expected_len(version, &pending));
                }
                Err(RxFailure { error, id: Some(id) }) if pending.contains(&id) => {
                    pending.retain(|&member| member != id);
                    self.mark(id, error);
                }
                Err(RxFailure { error, .. }) => {
                    if error == CommError::RxFail || Instant::now() >= deadline {
                        for id in pending.drain(..) {
                            self.mark(id, error);
                        }
                    }
                }
            }
        }
    }

    fn store_reply(&mut self, reply: StatusPacket) {
        let Some(entry) = self.entries.get_mut(&reply.id) else {
            return;
        };
        entry.status = reply.status;
        if reply.params.len() == usize::from(entry.length) {
            entry.received = reply.params;
            entry.result = Some(Ok(()));
        } else {
            warn!(
                id = reply.id,
                expected = entry.length,
                received = reply.params.len(),
                "group reply has wrong length"
            );
            entry.fail(CommError::RxCorrupt);
        }
    }

    /// One merged packet from the broadcast id carrying every device's answer.
    ///
    /// ```text
    /// [ERR][ID][DATA × n][CRC:2] … [ERR][ID][DATA × n]   (last CRC = packet CRC)
    /// ```
    fn receive_merged(&mut self, bus: &mut BusMaster<T>) {
        let version = bus.version();
        let n = usize::from(self.length);
        let stride = n + FAST_SYNC_OVERHEAD;
        // The first ERR is the packet's error byte, not a parameter.
        let params_len = self.order.len() * stride - 3;
        let deadline = Instant::now() + bus.packet_timeout(version.status_packet_len(params_len));

        let reply = loop {
            match bus.receive_status(deadline) {
                Ok(reply) if reply.id == BROADCAST_ID => break reply,
                Ok(reply) => trace!(id = reply.id, "ignoring unmerged reply"),
                Err(failure) => {
                    for id in self.order.clone() {
                        self.mark(id, failure.error);
                    }
                    return;
                }
            }
        };

        let mut merged = Vec::with_capacity(1 + reply.params.len());
        merged.push(reply.status.bits());
        merged.extend_from_slice(&reply.params);

        for (index, &id) in self.order.iter().enumerate() {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            let offset = index * stride;
            match merged.get(offset..offset + 2 + n) {
                Some([error, chunk_id, data @ ..]) if *chunk_id == id => {
                    entry.status = DeviceStatus(*error);
                    entry.received = data.to_vec();
                    entry.result = Some(Ok(()));
                }
                Some([_, chunk_id, ..]) => {
                    warn!(expected = id, found = *chunk_id, "fast sync chunk belongs to another device");
                    entry.fail(CommError::RxCorrupt);
                }
                _ => {
                    warn!(id, "fast sync reply truncated");
                    entry.fail(CommError::RxCorrupt);
                }
            }
        }
    }

    fn expected_len(&self, version: ProtocolVersion, ids: &[DeviceId]) -> usize {
        ids.iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| version.status_packet_len(usize::from(entry.length)))
            .sum()
    }

    fn mark(&mut self, id: DeviceId, error: CommError) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.fail(error);
        }
    }

    fn overall_result(&self) -> Result<(), CommError> {
        for id in &self.order {
            if let Some(entry) = self.entries.get(id) {
                entry.result.unwrap_or(Err(CommError::RxTimeout))?;
            }
        }
        Ok(())
    }

    // ── Results ───────────────────────────────────────────────────────────────

    /// Returns `true` if `[address, address + length)` of `id` lies inside the
    /// data validated by the last exchange.
    pub fn is_available(&self, id: DeviceId, address: u16, length: u16) -> bool {
        let Some(entry) = self.entries.get(&id) else {
            return false;
        };
        if !self.kind.expects_reply() || entry.result != Some(Ok(())) {
            return false;
        }
        let start = usize::from(entry.address);
        let end = start + entry.received.len();
        let first = usize::from(address);
        first >= start && first + usize::from(length) <= end
    }

    /// Raw bytes of a validated window.
    ///
    /// # Errors
    ///
    /// [`GroupError::UnknownId`] or [`GroupError::DataUnavailable`].
    pub fn data_window(&self, id: DeviceId, address: u16, length: u16) -> Result<&[u8], GroupError> {
        let entry = self.entries.get(&id).ok_or(GroupError::UnknownId(id))?;
        let unavailable = GroupError::DataUnavailable { id, address, length };
        if !self.is_available(id, address, length) {
            return Err(unavailable);
        }
        let offset = usize::from(address - entry.address);
        entry
            .received
            .get(offset..offset + usize::from(length))
            .ok_or(unavailable)
    }

    /// Little-endian integer of width 1, 2 or 4 from a validated window.
    ///
    /// # Errors
    ///
    /// [`GroupError::UnsupportedWidth`] for other widths, otherwise as
    /// [`GroupCore::data_window`].
    pub fn get_data(&self, id: DeviceId, address: u16, length: u16) -> Result<u32, GroupError> {
        if !matches!(length, 1 | 2 | 4) {
            return Err(GroupError::UnsupportedWidth(length));
        }
        self.data_window(id, address, length).map(params::le_value)
    }

    /// Status byte reported by `id` in the last exchange.
    ///
    /// # Errors
    ///
    /// [`GroupError::UnknownId`] if `id` is not in the group.
    pub fn get_error(&self, id: DeviceId) -> Result<DeviceStatus, GroupError> {
        self.entries
            .get(&id)
            .map(|entry| entry.status)
            .ok_or(GroupError::UnknownId(id))
    }

    /// Outcome of the last exchange for `id`; `None` before any exchange or
    /// for unknown ids.
    pub fn result(&self, id: DeviceId) -> Option<Result<(), CommError>> {
        self.entries.get(&id).and_then(|entry| entry.result)
    }
}
