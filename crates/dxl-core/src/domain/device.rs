//! Device addressing on the multi-drop bus.
//!
//! Every actuator on the bus answers to one 8-bit identifier.  Identifiers
//! `0..=252` are assignable, `254` is the broadcast address (every device
//! executes the instruction, none replies) and `255` is never valid on the
//! wire.

/// Bus address of one actuator.
pub type DeviceId = u8;

/// Highest identifier a device may be configured with.
pub const MAX_ID: DeviceId = 0xFC;

/// Broadcast address: every device acts on the instruction and none replies
/// (except for the group read instructions that explicitly solicit replies).
pub const BROADCAST_ID: DeviceId = 0xFE;

/// Reserved value that never appears as a valid id on the wire.
pub const INVALID_ID: DeviceId = 0xFF;

/// Returns `true` if `id` can be assigned to a single device.
///
/// # Examples
///
/// ```rust
/// use dxl_core::{is_addressable, BROADCAST_ID};
///
/// assert!(is_addressable(1));
/// assert!(!is_addressable(BROADCAST_ID));
/// ```
pub fn is_addressable(id: DeviceId) -> bool {
    id <= MAX_ID
}
