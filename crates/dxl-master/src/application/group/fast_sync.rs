//! Fast Sync Read and Fast Sync Write (Protocol 2.0 only).
//!
//! Same request layout as the plain sync kinds, but the devices cooperate to
//! put a single status packet on the line, sent from the broadcast id.  Each
//! device appends its own chunk:
//!
//! ```text
//! merged = [ERR₀][ID₀][DATA₀ × n][CRC:2][ERR₁][ID₁][DATA₁ × n][CRC:2] … [ERRₖ][IDₖ][DATAₖ × n]
//!           └ packet error byte
//! ```
//!
//! Chunk `i` therefore starts at offset `i × (n + 4)`.  The intermediate CRC
//! bytes are not checked; the packet CRC already covers them.  Fast Sync
//! Write devices answer the same way, echoing the window just written.

use dxl_core::{DeviceId, DeviceStatus};

use super::{GroupCore, GroupError, GroupKind};
use crate::application::bus_master::{CommError, SharedBus};
use crate::infrastructure::transport::Transport;

/// Reads one window from every member, collected as one merged reply.
pub struct GroupFastSyncRead<T: Transport> {
    core: GroupCore<T>,
}

impl<T: Transport> GroupFastSyncRead<T> {
    pub fn new(bus: SharedBus<T>, address: u16, length: u16) -> Self {
        Self {
            core: GroupCore::new(bus, GroupKind::FastSyncRead, address, length),
        }
    }

    /// Adds a device; the merged reply lists devices in this order.
    pub fn add_param(&mut self, id: DeviceId) -> Result<(), GroupError> {
        self.core.add_windowed(id, &[])
    }

    pub fn remove_param(&mut self, id: DeviceId) -> Result<(), GroupError> {
        self.core.remove_param(id)
    }

    pub fn clear_param(&mut self) {
        self.core.clear_param();
    }

    pub fn tx_packet(&mut self) -> Result<(), CommError> {
        self.core.tx_packet()
    }

    pub fn rx_packet(&mut self) -> Result<(), CommError> {
        self.core.rx_packet()
    }

    pub fn tx_rx_packet(&mut self) -> Result<(), CommError> {
        self.core.tx_rx_packet()
    }

    pub fn is_available(&self, id: DeviceId, address: u16, length: u16) -> bool {
        self.core.is_available(id, address, length)
    }

    pub fn get_data(&self, id: DeviceId, address: u16, length: u16) -> Result<u32, GroupError> {
        self.core.get_data(id, address, length)
    }

    pub fn data_window(&self, id: DeviceId, address: u16, length: u16) -> Result<&[u8], GroupError> {
        self.core.data_window(id, address, length)
    }

    pub fn get_error(&self, id: DeviceId) -> Result<DeviceStatus, GroupError> {
        self.core.get_error(id)
    }

    pub fn result(&self, id: DeviceId) -> Option<Result<(), CommError>> {
        self.core.result(id)
    }

    pub fn core(&self) -> &GroupCore<T> {
        &self.core
    }
}

/// Writes one window on every member; the merged reply echoes it back.
pub struct GroupFastSyncWrite<T: Transport> {
    core: GroupCore<T>,
}

impl<T: Transport> GroupFastSyncWrite<T> {
    pub fn new(bus: SharedBus<T>, address: u16, length: u16) -> Self {
        Self {
            core: GroupCore::new(bus, GroupKind::FastSyncWrite, address, length),
        }
    }

    pub fn add_param(&mut self, id: DeviceId, data: &[u8]) -> Result<(), GroupError> {
        self.core.add_windowed(id, data)
    }

    pub fn change_param(&mut self, id: DeviceId, data: &[u8]) -> Result<(), GroupError> {
        self.core.change_windowed(id, data)
    }

    pub fn remove_param(&mut self, id: DeviceId) -> Result<(), GroupError> {
        self.core.remove_param(id)
    }

    pub fn clear_param(&mut self) {
        self.core.clear_param();
    }

    pub fn tx_packet(&mut self) -> Result<(), CommError> {
        self.core.tx_packet()
    }

    pub fn rx_packet(&mut self) -> Result<(), CommError> {
        self.core.rx_packet()
    }

    pub fn tx_rx_packet(&mut self) -> Result<(), CommError> {
        self.core.tx_rx_packet()
    }

    pub fn is_available(&self, id: DeviceId, address: u16, length: u16) -> bool {
        self.core.is_available(id, address, length)
    }

    pub fn get_data(&self, id: DeviceId, address: u16, length: u16) -> Result<u32, GroupError> {
        self.core.get_data(id, address, length)
    }

    pub fn get_error(&self, id: DeviceId) -> Result<DeviceStatus, GroupError> {
        self.core.get_error(id)
    }

    pub fn result(&self, id: DeviceId) -> Option<Result<(), CommError>> {
        self.core.result(id)
    }

    pub fn core(&self) -> &GroupCore<T> {
        &self.core
    }
}
