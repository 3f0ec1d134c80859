//! Shared fixtures for the dxl-master integration tests.
//!
//! [`DeviceBus`] simulates a chain of actuators behind a [`MockTransport`]:
//! every instruction the master writes is decoded, applied to the simulated
//! control tables, and answered with real encoded status packets.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use dxl_core::{
    decode_instruction, encode_status, DeviceId, DeviceStatus, Instruction, ProtocolVersion,
    StatusPacket, BROADCAST_ID,
};
use dxl_master::application::bus_master::BusMaster;
use dxl_master::infrastructure::transport::mock::MockTransport;

/// Size of each simulated control table.
const TABLE_SIZE: usize = 1024;

/// Model number reported on PING.
pub const MODEL_NUMBER: u16 = 1030;

/// Firmware version reported on PING (Protocol 2.0 only).
pub const FIRMWARE_VERSION: u8 = 38;

/// Installs a test-friendly tracing subscriber; `RUST_LOG=trace` shows the
/// engine's receive loop.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Opens a bus master over a fresh mock wired to `devices`.
pub fn open_bus(version: ProtocolVersion, devices: &DeviceBus) -> (BusMaster<MockTransport>, MockTransport) {
    init_tracing();
    let mock = MockTransport::new();
    devices.attach(&mock);
    let mut bus = BusMaster::new(mock.clone(), version);
    bus.open(1_000_000).expect("mock opens");
    (bus, mock)
}

#[derive(Default)]
struct BusState {
    tables: BTreeMap<DeviceId, Vec<u8>>,
    corrupt: HashSet<DeviceId>,
    silent: HashSet<DeviceId>,
    reverse: bool,
}

/// Simulated devices sharing one line.
#[derive(Clone)]
pub struct DeviceBus {
    version: ProtocolVersion,
    state: Arc<Mutex<BusState>>,
}

impl DeviceBus {
    pub fn new(version: ProtocolVersion, ids: &[DeviceId]) -> Self {
        let mut state = BusState::default();
        for &id in ids {
            state.tables.insert(id, vec![0; TABLE_SIZE]);
        }
        Self {
            version,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the devices answer everything `mock` transmits.
    pub fn attach(&self, mock: &MockTransport) {
        let devices = self.clone();
        mock.set_responder(move |frame| devices.respond(frame));
    }

    pub fn set_table(&self, id: DeviceId, address: u16, bytes: &[u8]) {
        let mut state = self.state();
        let table = state.tables.get_mut(&id).expect("device exists");
        let start = usize::from(address);
        table[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn table(&self, id: DeviceId, address: u16, len: usize) -> Vec<u8> {
        let state = self.state();
        let start = usize::from(address);
        state.tables[&id][start..start + len].to_vec()
    }

    /// Replies from `id` arrive with a broken checksum/CRC.
    pub fn corrupt_replies_from(&self, id: DeviceId) {
        self.state().corrupt.insert(id);
    }

    /// `id` stays on the bus for writes but never answers.
    pub fn silence(&self, id: DeviceId) {
        self.state().silent.insert(id);
    }

    /// Group replies are put on the line last device first.
    pub fn reply_in_reverse(&self) {
        self.state().reverse = true;
    }

    // ── Instruction handling ──────────────────────────────────────────────────

    fn respond(&self, frame: &[u8]) -> Vec<u8> {
        let Ok((packet, _)) = decode_instruction(self.version, frame) else {
            return Vec::new();
        };
        let params = packet.params.as_slice();
        let mut state = self.state();

        let replies: Vec<(DeviceId, Vec<u8>)> = match packet.instruction {
            Instruction::Ping => state
                .tables
                .keys()
                .filter(|&&id| packet.id == BROADCAST_ID || packet.id == id)
                .map(|&id| (id, self.ping_params()))
                .collect(),
            Instruction::Read => {
                let mut pos = 0;
                let address = self.field(params, &mut pos);
                let len = self.field(params, &mut pos);
                state
                    .tables
                    .get(&packet.id)
                    .map(|table| vec![(packet.id, table[address..address + len].to_vec())])
                    .unwrap_or_default()
            }
            Instruction::Write => {
                let mut pos = 0;
                let address = self.field(params, &mut pos);
                let data = &params[pos..];
                let mut replies = Vec::new();
                for (&id, table) in state.tables.iter_mut() {
                    if packet.id == BROADCAST_ID || packet.id == id {
                        table[address..address + data.len()].copy_from_slice(data);
                        if packet.id == id {
                            replies.push((id, Vec::new()));
                        }
                    }
                }
                replies
            }
            Instruction::SyncWrite | Instruction::FastSyncWrite => {
                let mut pos = 0;
                let address = self.field(params, &mut pos);
                let len = self.field(params, &mut pos);
                let mut written = Vec::new();
                for chunk in params[pos..].chunks(len + 1) {
                    if let Some(table) = state.tables.get_mut(&chunk[0]) {
                        table[address..address + len].copy_from_slice(&chunk[1..]);
                        written.push(chunk[0]);
                    }
                }
                if packet.instruction == Instruction::FastSyncWrite {
                    return self.merged_reply(&state, &written, address, len);
                }
                Vec::new()
            }
            Instruction::SyncRead => {
                let mut pos = 0;
                let address = self.field(params, &mut pos);
                let len = self.field(params, &mut pos);
                params[pos..]
                    .iter()
                    .filter_map(|id| state.tables.get(id).map(|table| (*id, table[address..address + len].to_vec())))
                    .collect()
            }
            Instruction::FastSyncRead => {
                let mut pos = 0;
                let address = self.field(params, &mut pos);
                let len = self.field(params, &mut pos);
                let ids = params[pos..].to_vec();
                return self.merged_reply(&state, &ids, address, len);
            }
            Instruction::BulkRead => self.bulk_read(&state, params),
            Instruction::BulkWrite => {
                let mut pos = 0;
                while pos < params.len() {
                    let id = params[pos];
                    pos += 1;
                    let address = self.field(params, &mut pos);
                    let len = self.field(params, &mut pos);
                    if let Some(table) = state.tables.get_mut(&id) {
                        table[address..address + len].copy_from_slice(&params[pos..pos + len]);
                    }
                    pos += len;
                }
                Vec::new()
            }
            _ => Vec::new(),
        };

        let mut replies: Vec<_> = replies
            .into_iter()
            .filter(|(id, _)| !state.silent.contains(id))
            .collect();
        if state.reverse {
            replies.reverse();
        }

        let mut line = Vec::new();
        for (id, data) in replies {
            let mut bytes = encode_status(self.version, &StatusPacket::new(id, DeviceStatus::OK, data))
                .expect("status encodes");
            if state.corrupt.contains(&id) {
                if let Some(last) = bytes.last_mut() {
                    *last ^= 0xFF;
                }
            }
            line.extend(bytes);
        }
        line
    }

    fn bulk_read(&self, state: &BusState, params: &[u8]) -> Vec<(DeviceId, Vec<u8>)> {
        let mut replies = Vec::new();
        let mut pos = if self.version == ProtocolVersion::V1 { 1 } else { 0 };
        while pos < params.len() {
            let (id, address, len) = match self.version {
                ProtocolVersion::V1 => {
                    let len = usize::from(params[pos]);
                    (params[pos + 1], usize::from(params[pos + 2]), len)
                }
                ProtocolVersion::V2 => {
                    let mut field_pos = pos + 1;
                    let address = self.field(params, &mut field_pos);
                    let len = self.field(params, &mut field_pos);
                    (params[pos], address, len)
                }
            };
            pos += if self.version == ProtocolVersion::V1 { 3 } else { 5 };
            if let Some(table) = state.tables.get(&id) {
                replies.push((id, table[address..address + len].to_vec()));
            }
        }
        replies
    }

    /// One status packet from the broadcast id carrying every chunk.
    fn merged_reply(&self, state: &BusState, ids: &[DeviceId], address: usize, len: usize) -> Vec<u8> {
        let present: Vec<DeviceId> = ids
            .iter()
            .copied()
            .filter(|id| state.tables.contains_key(id) && !state.silent.contains(id))
            .collect();
        if present.is_empty() {
            return Vec::new();
        }

        let mut params = Vec::new();
        for (index, id) in present.iter().enumerate() {
            if index > 0 {
                params.extend_from_slice(&[0x00, 0x00, 0x00]);
            }
            params.push(*id);
            params.extend_from_slice(&state.tables[id][address..address + len]);
        }
        encode_status(self.version, &StatusPacket::new(BROADCAST_ID, DeviceStatus::OK, params))
            .expect("merged status encodes")
    }

    fn ping_params(&self) -> Vec<u8> {
        match self.version {
            ProtocolVersion::V1 => Vec::new(),
            ProtocolVersion::V2 => {
                let mut params = MODEL_NUMBER.to_le_bytes().to_vec();
                params.push(FIRMWARE_VERSION);
                params
            }
        }
    }

    fn field(&self, params: &[u8], pos: &mut usize) -> usize {
        match self.version {
            ProtocolVersion::V1 => {
                let value = usize::from(params[*pos]);
                *pos += 1;
                value
            }
            ProtocolVersion::V2 => {
                let value = usize::from(u16::from_le_bytes([params[*pos], params[*pos + 1]]));
                *pos += 2;
                value
            }
        }
    }
}
