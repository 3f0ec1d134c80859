//! Bulk Read and Bulk Write: a different window per device.
//!
//! Unlike the sync kinds, each member carries its own start address and
//! length, so one packet can fetch the position of one actuator and the
//! temperature of another.  Bulk Read exists on both protocol versions; Bulk
//! Write only on Protocol 2.0.

use dxl_core::{DeviceId, DeviceStatus};

use super::{GroupCore, GroupError, GroupKind};
use crate::application::bus_master::{CommError, SharedBus};
use crate::infrastructure::transport::Transport;

/// Reads a per-device window from every member.
pub struct GroupBulkRead<T: Transport> {
    core: GroupCore<T>,
}

impl<T: Transport> GroupBulkRead<T> {
    pub fn new(bus: SharedBus<T>) -> Self {
        Self {
            core: GroupCore::new(bus, GroupKind::BulkRead, 0, 0),
        }
    }

    /// Adds a device and the window to read from it.
    ///
    /// # Errors
    ///
    /// [`GroupError::DuplicateId`] if already present, [`GroupError::InvalidId`]
    /// for the broadcast or a reserved id.
    pub fn add_param(&mut self, id: DeviceId, address: u16, length: u16) -> Result<(), GroupError> {
        self.core.add_entry(id, address, length, &[])
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

/// Writes a per-device window on every member.  Devices do not answer.
pub struct GroupBulkWrite<T: Transport> {
    core: GroupCore<T>,
}

impl<T: Transport> GroupBulkWrite<T> {
    pub fn new(bus: SharedBus<T>) -> Self {
        Self {
            core: GroupCore::new(bus, GroupKind::BulkWrite, 0, 0),
        }
    }

    /// Adds a device with the bytes to write at `address`; the window length
    /// is the data length.
    pub fn add_param(&mut self, id: DeviceId, address: u16, data: &[u8]) -> Result<(), GroupError> {
        let length = window_len(id, data)?;
        self.core.add_entry(id, address, length, data)
    }

    /// Replaces the window and data of an existing member.
    pub fn change_param(&mut self, id: DeviceId, address: u16, data: &[u8]) -> Result<(), GroupError> {
        let length = window_len(id, data)?;
        self.core.change_entry(id, address, length, data)
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

fn window_len(id: DeviceId, data: &[u8]) -> Result<u16, GroupError> {
    u16::try_from(data.len()).map_err(|_| GroupError::DataLength {
        id,
        expected: usize::from(u16::MAX),
        actual: data.len(),
    })
}
