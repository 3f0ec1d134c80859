//! Serial-port transport built on the `serialport` crate.
//!
//! Compiled only with the `serial` feature.  The platform backend (termios on
//! Unix, COM ports on Windows) is chosen by `serialport` itself.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use super::{Transport, TransportError};
use crate::infrastructure::storage::config::PortConfig;

/// Read timeout used while the port is idle; real reads set their own.
const IDLE_TIMEOUT: Duration = Duration::from_millis(1);

/// A USB-serial adapter (or native UART) driving the bus.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    latency_timer: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Creates a closed transport for the device at `path`.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            latency_timer: super::DEFAULT_LATENCY_TIMER,
            port: None,
        }
    }

    /// Creates a closed transport from the `[port]` configuration section.
    pub fn from_config(config: &PortConfig) -> Self {
        Self {
            path: config.device.clone(),
            baud_rate: config.baud_rate,
            latency_timer: Duration::from_millis(config.latency_timer_ms),
            port: None,
        }
    }

    /// Device path this transport opens.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }

    fn io_error(&self, source: io::Error) -> TransportError {
        TransportError::Io {
            port: self.path.clone(),
            source,
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .timeout(IDLE_TIMEOUT)
            .open()?;
        info!(port = %self.path, baud_rate = self.baud_rate, "serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.path, "serial port closed");
        }
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(baud_rate)?;
        }
        self.baud_rate = baud_rate;
        debug!(port = %self.path, baud_rate, "baud rate changed");
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        let result = port.write_all(bytes).and_then(|()| port.flush());
        result.map_err(|e| self.io_error(e))?;
        Ok(bytes.len())
    }

    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let port = self.port_mut()?;
        port.set_timeout(timeout.max(IDLE_TIMEOUT))?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn clear_read_buffer(&mut self) -> Result<(), TransportError> {
        self.port_mut()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn latency_timer(&self) -> Duration {
        self.latency_timer
    }
}
