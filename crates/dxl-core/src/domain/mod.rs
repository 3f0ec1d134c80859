//! Domain entities for the actuator bus.
//!
//! This module contains pure bus addressing rules with no infrastructure
//! dependencies.
//!
//! # What is "domain" here? (for beginners)
//!
//! The innermost layer holds the facts that are true no matter which wire
//! format or transport is in use: how devices are addressed, which addresses
//! are reserved, and what "broadcast" means.  Code in outer layers (codec,
//! transaction engine, group aggregators) depends on the domain, but the
//! domain never depends on them.

/// Device identifiers and reserved addresses.
///
/// See [`device::DeviceId`] for the main type.
pub mod device;
