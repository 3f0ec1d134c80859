//! # dxl-master
//!
//! Host side of an actuator bus: the transaction engine that performs one
//! instruction/status exchange at a time, and the group aggregators that
//! address many devices with a single packet.
//!
//! Packet layouts live in `dxl-core`; this crate owns the port, the timing and
//! the error model.
//!
//! # Layers
//!
//! - **`application`** – [`application::bus_master::BusMaster`] and the
//!   sync/bulk/fast-sync groups.
//! - **`infrastructure`** – the [`infrastructure::transport::Transport`]
//!   abstraction with its serial and in-memory implementations, and the TOML
//!   configuration store.
//!
//! # Example
//!
//! ```rust
//! use dxl_core::{encode_status, DeviceStatus, ProtocolVersion, StatusPacket};
//! use dxl_master::application::bus_master::BusMaster;
//! use dxl_master::infrastructure::transport::mock::MockTransport;
//!
//! // Script the reply of device 1: present position 564.
//! let mock = MockTransport::new();
//! let reply = StatusPacket::new(1, DeviceStatus::OK, vec![0x34, 0x02, 0x00, 0x00]);
//! mock.push_reply(encode_status(ProtocolVersion::V2, &reply).unwrap());
//!
//! let mut bus = BusMaster::new(mock, ProtocolVersion::V2);
//! bus.open(1_000_000).unwrap();
//! let (position, status) = bus.read_u32(1, 132).unwrap();
//!
//! assert_eq!(position, 564);
//! assert!(status.is_ok());
//! ```

pub mod application;
pub mod infrastructure;
