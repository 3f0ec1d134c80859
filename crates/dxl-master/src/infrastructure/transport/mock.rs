//! Scripted in-memory transport.
//!
//! Stands in for the serial line in tests and examples.  Cloning a
//! [`MockTransport`] yields a second handle onto the same state, so a test can
//! move one handle into the bus master and keep the other to script replies
//! and inspect what was written.
//!
//! Bytes reach the receive side in three ways:
//!
//! - [`MockTransport::push_reply`]: scripted replies, one delivered per write.
//! - [`MockTransport::set_responder`]: a closure standing in for the devices,
//!   called with every written frame.
//! - [`MockTransport::inject_rx`]: bytes already waiting before the next
//!   write (stale data the engine must discard).

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Transport, TransportError};

/// Device simulator invoked with every written frame; returns the bytes the
/// devices put on the line in response.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Port name reported in injected I/O errors.
const MOCK_PORT: &str = "mock";

/// Receive deadline used instead of the baud-rate formula, so tests that
/// expect a timeout finish quickly.
const DEFAULT_MOCK_TIMEOUT: Duration = Duration::from_millis(5);

#[derive(Default)]
struct MockState {
    open: bool,
    baud_rate: u32,
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    written: Vec<Vec<u8>>,
    clear_count: usize,
    read_chunk: Option<usize>,
    packet_timeout: Option<Duration>,
    fail_open: bool,
    fail_baud_rate: bool,
    fail_write: bool,
    fail_read: bool,
}

/// In-memory [`Transport`] with scripted replies.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a closed mock with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `bytes` to arrive after the next write.
    pub fn push_reply(&self, bytes: impl Into<Vec<u8>>) {
        self.state().replies.push_back(bytes.into());
    }

    /// Installs a device simulator called with every written frame.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.state().responder = Some(Box::new(responder));
    }

    /// Places `bytes` in the receive buffer right now.
    pub fn inject_rx(&self, bytes: &[u8]) {
        self.state().rx.extend(bytes.iter().copied());
    }

    /// Limits each read to at most `n` bytes, to exercise frame reassembly.
    pub fn set_read_chunk(&self, n: usize) {
        self.state().read_chunk = Some(n.max(1));
    }

    /// Overrides the receive deadline returned by `packet_timeout`.
    pub fn set_packet_timeout(&self, timeout: Duration) {
        self.state().packet_timeout = Some(timeout);
    }

    /// Makes the next `open` calls fail.
    pub fn fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// Makes the next `set_baud_rate` calls fail.
    pub fn fail_baud_rate(&self, fail: bool) {
        self.state().fail_baud_rate = fail;
    }

    /// Makes the next `write_bytes` calls fail.
    pub fn fail_write(&self, fail: bool) {
        self.state().fail_write = fail;
    }

    /// Makes the next `read_bytes` calls fail.
    pub fn fail_read(&self, fail: bool) {
        self.state().fail_read = fail;
    }

    /// Every frame written so far, oldest first.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// The most recent frame written, if any.
    pub fn last_written(&self) -> Option<Vec<u8>> {
        self.state().written.last().cloned()
    }

    /// Number of `clear_read_buffer` calls.
    pub fn clear_count(&self) -> usize {
        self.state().clear_count
    }

    /// Returns `true` while the transport is open.
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Bytes still waiting on the receive side.
    pub fn pending_rx(&self) -> usize {
        self.state().rx.len()
    }
}

fn injected(kind: io::ErrorKind) -> TransportError {
    TransportError::Io {
        port: MOCK_PORT.to_string(),
        source: io::Error::new(kind, "injected failure"),
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.fail_open {
            return Err(injected(io::ErrorKind::NotFound));
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.state().open = false;
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.fail_baud_rate {
            return Err(injected(io::ErrorKind::InvalidInput));
        }
        state.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.state().baud_rate
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if state.fail_write {
            return Err(injected(io::ErrorKind::BrokenPipe));
        }

        state.written.push(bytes.to_vec());
        if let Some(reply) = state.replies.pop_front() {
            state.rx.extend(reply);
        }
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(bytes);
            state.rx.extend(reply);
        }
        Ok(bytes.len())
    }

    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let mut state = self.state();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if state.fail_read {
            return Err(injected(io::ErrorKind::TimedOut));
        }

        if state.rx.is_empty() {
            drop(state);
            // Nothing will ever arrive; emulate a blocking read briefly.
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            return Ok(0);
        }

        let limit = state.read_chunk.unwrap_or(usize::MAX).min(buf.len());
        let n = limit.min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_read_buffer(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.rx.clear();
        state.clear_count += 1;
        Ok(())
    }

    fn packet_timeout(&self, _expected_len: usize) -> Duration {
        self.state().packet_timeout.unwrap_or(DEFAULT_MOCK_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.open().expect("open should succeed");
        mock
    }

    #[test]
    fn test_write_records_frame_and_delivers_scripted_reply() {
        // Arrange
        let mut mock = opened();
        mock.push_reply(vec![1, 2, 3]);

        // Act
        mock.write_bytes(&[0xAA]).unwrap();
        let mut buf = [0u8; 8];
        let n = mock.read_bytes(&mut buf, Duration::from_millis(1)).unwrap();

        // Assert
        assert_eq!(mock.written(), vec![vec![0xAA]]);
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[test]
    fn test_clones_share_state() {
        let mut mock = opened();
        let observer = mock.clone();

        mock.write_bytes(&[1, 2]).unwrap();

        assert_eq!(observer.last_written(), Some(vec![1, 2]));
    }

    #[test]
    fn test_clear_discards_injected_bytes() {
        let mut mock = opened();
        mock.inject_rx(&[0xFF, 0x00]);

        mock.clear_read_buffer().unwrap();

        assert_eq!(mock.pending_rx(), 0);
        assert_eq!(mock.clear_count(), 1);
    }

    #[test]
    fn test_read_chunk_limits_each_read() {
        let mut mock = opened();
        mock.set_read_chunk(2);
        mock.inject_rx(&[1, 2, 3, 4, 5]);

        let mut buf = [0u8; 8];
        assert_eq!(mock.read_bytes(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(mock.pending_rx(), 3);
    }

    #[test]
    fn test_empty_read_returns_zero() {
        let mut mock = opened();
        let mut buf = [0u8; 4];
        assert_eq!(mock.read_bytes(&mut buf, Duration::from_millis(1)).unwrap(), 0);
    }

    #[test]
    fn test_responder_sees_every_write() {
        let mut mock = opened();
        mock.set_responder(|frame| frame.iter().rev().copied().collect());

        mock.write_bytes(&[1, 2, 3]).unwrap();

        assert_eq!(mock.pending_rx(), 3);
    }

    #[test]
    fn test_write_on_closed_transport_fails() {
        let mut mock = MockTransport::new();
        assert!(matches!(mock.write_bytes(&[1]), Err(TransportError::NotOpen)));
    }

    #[test]
    fn test_injected_failures() {
        let mut mock = MockTransport::new();
        mock.fail_open(true);
        assert!(mock.open().is_err());

        mock.fail_open(false);
        mock.open().unwrap();
        mock.fail_write(true);
        assert!(mock.write_bytes(&[1]).is_err());
    }
}
