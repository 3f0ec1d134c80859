//! Byte-stream transport used by the bus master.
//!
//! The transaction engine never touches a serial port directly.  It talks to a
//! [`Transport`], which hides whether the bytes travel over a USB-serial
//! adapter, a test double, or anything else that can move bytes half-duplex.
//!
//! # Timing (for beginners)
//!
//! A reply cannot arrive before the instruction has been fully shifted out and
//! the device has shifted its reply back in.  At `baud` bits per second one
//! byte (8 data bits plus start and stop bit) takes `10 / baud` seconds.  USB
//! serial adapters additionally buffer incoming bytes for up to their
//! *latency timer* (16 ms by default) before handing them to the host.  The
//! receive deadline therefore is:
//!
//! ```text
//! byte_time × expected_len + 2 × latency_timer + 2 ms
//! ```
//!
//! # Testability
//!
//! [`mock::MockTransport`] scripts replies and records every write, so the
//! engine and the group aggregators can be tested without hardware.

use std::time::Duration;

use thiserror::Error;

pub mod mock;

#[cfg(feature = "serial")]
pub mod serial;

/// Latency timer of common USB-serial adapters.
pub const DEFAULT_LATENCY_TIMER: Duration = Duration::from_millis(16);

/// Fixed margin added to every receive deadline.
const TIMEOUT_MARGIN: Duration = Duration::from_millis(2);

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has not been opened (or was closed).
    #[error("transport is not open")]
    NotOpen,

    /// The underlying device reported an I/O failure.
    #[error("I/O error on {port}: {source}")]
    Io {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// The serial-port driver rejected an operation.
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
}

/// Capability set the bus master needs from the physical link.
///
/// All calls block.  [`Transport::read_bytes`] must return `Ok(0)` when
/// nothing arrived within `timeout`; a timeout is not an error at this layer.
pub trait Transport: Send {
    /// Acquires the underlying device.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Releases the underlying device.  Closing a closed transport is a no-op.
    fn close(&mut self);

    /// Changes the line speed.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError>;

    /// Current line speed in bits per second.
    fn baud_rate(&self) -> u32;

    /// Writes `bytes` and returns how many were accepted.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Reads at most `buf.len()` bytes, waiting up to `timeout` for the first.
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Discards bytes that arrived but were not read yet.
    fn clear_read_buffer(&mut self) -> Result<(), TransportError>;

    /// Input buffering delay of the adapter.
    fn latency_timer(&self) -> Duration {
        DEFAULT_LATENCY_TIMER
    }

    /// Receive deadline for a reply of `expected_len` bytes.
    fn packet_timeout(&self, expected_len: usize) -> Duration {
        let baud = u64::from(self.baud_rate().max(1));
        let line_time = Duration::from_micros(expected_len as u64 * 10_000_000 / baud);
        line_time + self.latency_timer() * 2 + TIMEOUT_MARGIN
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        (**self).set_baud_rate(baud_rate)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        (**self).write_bytes(bytes)
    }

    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).read_bytes(buf, timeout)
    }

    fn clear_read_buffer(&mut self) -> Result<(), TransportError> {
        (**self).clear_read_buffer()
    }

    fn latency_timer(&self) -> Duration {
        (**self).latency_timer()
    }

    fn packet_timeout(&self, expected_len: usize) -> Duration {
        (**self).packet_timeout(expected_len)
    }
}
