//! Parameter-block builders for the addressed instructions.
//!
//! Protocol 1.0 encodes addresses and lengths as single bytes, Protocol 2.0
//! as 16-bit little-endian words.  A value that does not fit the field is
//! reported as [`PacketError::FieldOutOfRange`] instead of being truncated.
//!
//! ```text
//! READ        1.0: [addr][len]                 2.0: [addr:2][len:2]
//! WRITE       1.0: [addr][data…]               2.0: [addr:2][data…]
//! SYNC READ                                    2.0: [addr:2][len:2][id…]
//! SYNC WRITE  1.0: [addr][len]([id][data…])…   2.0: [addr:2][len:2]([id][data…])…
//! BULK READ   1.0: [0x00]([len][id][addr])…    2.0: ([id][addr:2][len:2])…
//! BULK WRITE                                   2.0: ([id][addr:2][len:2][data…])…
//! ```

use crate::domain::device::DeviceId;
use crate::protocol::codec::PacketError;
use crate::protocol::messages::ProtocolVersion;

/// Appends an address or length field in the version's width.
///
/// # Errors
///
/// Returns [`PacketError::FieldOutOfRange`] if `value` does not fit.
pub fn push_field(
    buf: &mut Vec<u8>,
    version: ProtocolVersion,
    field: &'static str,
    value: usize,
) -> Result<(), PacketError> {
    match version {
        ProtocolVersion::V1 => {
            let byte = u8::try_from(value).map_err(|_| PacketError::FieldOutOfRange {
                field,
                value,
                max: u8::MAX as usize,
            })?;
            buf.push(byte);
        }
        ProtocolVersion::V2 => {
            let word = u16::try_from(value).map_err(|_| PacketError::FieldOutOfRange {
                field,
                value,
                max: u16::MAX as usize,
            })?;
            buf.extend_from_slice(&word.to_le_bytes());
        }
    }
    Ok(())
}

/// READ parameters.
pub fn read(version: ProtocolVersion, address: u16, length: u16) -> Result<Vec<u8>, PacketError> {
    let mut buf = Vec::with_capacity(4);
    push_field(&mut buf, version, "address", address.into())?;
    push_field(&mut buf, version, "length", length.into())?;
    Ok(buf)
}

/// WRITE (and REG WRITE) parameters.
pub fn write(version: ProtocolVersion, address: u16, data: &[u8]) -> Result<Vec<u8>, PacketError> {
    let mut buf = Vec::with_capacity(2 + data.len());
    push_field(&mut buf, version, "address", address.into())?;
    buf.extend_from_slice(data);
    Ok(buf)
}

/// SYNC READ (and FAST SYNC READ) parameters: the shared window followed by
/// the id list in reply order.
pub fn sync_read(
    version: ProtocolVersion,
    address: u16,
    length: u16,
    ids: &[DeviceId],
) -> Result<Vec<u8>, PacketError> {
    let mut buf = read(version, address, length)?;
    buf.extend_from_slice(ids);
    Ok(buf)
}

/// SYNC WRITE (and FAST SYNC WRITE) parameters.
///
/// Every entry's data must already be `length` bytes long; the aggregators
/// enforce this when entries are added.
pub fn sync_write<'a, I>(
    version: ProtocolVersion,
    address: u16,
    length: u16,
    entries: I,
) -> Result<Vec<u8>, PacketError>
where
    I: IntoIterator<Item = (DeviceId, &'a [u8])>,
{
    let mut buf = read(version, address, length)?;
    for (id, data) in entries {
        buf.push(id);
        buf.extend_from_slice(data);
    }
    Ok(buf)
}

/// BULK READ parameters for `(id, address, length)` triples.
pub fn bulk_read<I>(version: ProtocolVersion, entries: I) -> Result<Vec<u8>, PacketError>
where
    I: IntoIterator<Item = (DeviceId, u16, u16)>,
{
    let mut buf = Vec::new();
    if version == ProtocolVersion::V1 {
        buf.push(0x00);
    }
    for (id, address, length) in entries {
        match version {
            ProtocolVersion::V1 => {
                push_field(&mut buf, version, "length", length.into())?;
                buf.push(id);
                push_field(&mut buf, version, "address", address.into())?;
            }
            ProtocolVersion::V2 => {
                buf.push(id);
                push_field(&mut buf, version, "address", address.into())?;
                push_field(&mut buf, version, "length", length.into())?;
            }
        }
    }
    Ok(buf)
}

/// BULK WRITE parameters for `(id, address, data)` triples.
pub fn bulk_write<'a, I>(version: ProtocolVersion, entries: I) -> Result<Vec<u8>, PacketError>
where
    I: IntoIterator<Item = (DeviceId, u16, &'a [u8])>,
{
    let mut buf = Vec::new();
    for (id, address, data) in entries {
        buf.push(id);
        push_field(&mut buf, version, "address", address.into())?;
        push_field(&mut buf, version, "length", data.len())?;
        buf.extend_from_slice(data);
    }
    Ok(buf)
}

/// Assembles up to four little-endian bytes into an integer.
///
/// # Examples
///
/// ```rust
/// use dxl_core::protocol::params::le_value;
///
/// assert_eq!(le_value(&[0x00, 0x02]), 512);
/// ```
pub fn le_value(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .rev()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}
