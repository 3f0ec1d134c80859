//! Sync Read and Sync Write: one shared control-table window, many devices.
//!
//! Every device in a sync group is read from (or written to) the same
//! `address` and `length`.  Sync Read needs Protocol 2.0; Sync Write works on
//! both versions.

use dxl_core::{DeviceId, DeviceStatus};

use super::{GroupCore, GroupError, GroupKind};
use crate::application::bus_master::{CommError, SharedBus};
use crate::infrastructure::transport::Transport;

/// Reads the same window from every member.
pub struct GroupSyncRead<T: Transport> {
    core: GroupCore<T>,
}

impl<T: Transport> GroupSyncRead<T> {
    pub fn new(bus: SharedBus<T>, address: u16, length: u16) -> Self {
        Self {
            core: GroupCore::new(bus, GroupKind::SyncRead, address, length),
        }
    }

    /// Adds a device to the end of the read order.
    ///
    /// # Errors
    ///
    /// [`GroupError::DuplicateId`] if already present, [`GroupError::InvalidId`]
    /// for the broadcast or a reserved id.
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

    /// The shared engine, for inspection.
    pub fn core(&self) -> &GroupCore<T> {
        &self.core
    }
}

/// Writes the same window on every member, each with its own data.
/// Devices do not answer.
pub struct GroupSyncWrite<T: Transport> {
    core: GroupCore<T>,
}

impl<T: Transport> GroupSyncWrite<T> {
    pub fn new(bus: SharedBus<T>, address: u16, length: u16) -> Self {
        Self {
            core: GroupCore::new(bus, GroupKind::SyncWrite, address, length),
        }
    }

    /// Adds a device with the `length` bytes to write to it.
    ///
    /// # Errors
    ///
    /// [`GroupError::DataLength`] if `data` does not match the window,
    /// otherwise as [`GroupSyncRead::add_param`].
    pub fn add_param(&mut self, id: DeviceId, data: &[u8]) -> Result<(), GroupError> {
        self.core.add_windowed(id, data)
    }

    /// Replaces the data of an existing member.
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

    pub fn core(&self) -> &GroupCore<T> {
        &self.core
    }
}
