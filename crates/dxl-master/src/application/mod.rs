//! Application layer: the bus transactions a host performs.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The *domain* crate (`dxl-core`) knows what a packet looks like but never
//! touches a port.  The *infrastructure* layer moves bytes but knows nothing
//! about packets.  This layer joins them:
//!
//! - **Orchestrate** encode → write → read → decode for one exchange.
//! - **Depend on abstractions**: every use case is generic over
//!   [`crate::infrastructure::transport::Transport`], so the same code drives
//!   a real serial adapter or the in-memory mock used by the tests.
//!
//! # Sub-modules
//!
//! - **`bus_master`** – Single-device transactions (ping, read, write, reboot,
//!   …) and the receive loop shared by everything else.
//!
//! - **`group`** – Sync, bulk and fast-sync aggregators that address many
//!   devices with one broadcast instruction.

pub mod bus_master;
pub mod group;
