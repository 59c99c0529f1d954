//! In-memory link for tests and scripted servers
//!
//! A [`MemoryLink`] never blocks. Reads are served from bytes injected by the
//! test or produced by a responder closure reacting to each `send`; a read
//! that cannot be satisfied fails with a timeout right away and leaves the
//! buffered bytes untouched.

use crate::error::{LinkError, Result};
use crate::link::{DEFAULT_TIMEOUT, Link};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Produces the server's reply bytes for one chunk sent by the client
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

struct MemoryState {
    connected: bool,
    broken: bool,
    timeout: Duration,
    baudrate: Option<u32>,
    incoming: VecDeque<u8>,
    sent: Vec<Vec<u8>>,
    responder: Option<Responder>,
    connect_calls: usize,
    disconnect_calls: usize,
}

/// Cloneable handle to a shared in-memory channel
///
/// Clones observe the same state, so a test can keep one handle while the
/// client under test owns another.
#[derive(Clone)]
pub struct MemoryLink {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLink {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                connected: false,
                broken: false,
                timeout: DEFAULT_TIMEOUT,
                baudrate: None,
                incoming: VecDeque::new(),
                sent: Vec::new(),
                responder: None,
                connect_calls: 0,
                disconnect_calls: 0,
            })),
        }
    }

    /// Link whose replies come from `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let link = Self::new();
        link.lock().responder = Some(Box::new(responder));
        link
    }

    /// Report a baudrate, making the link look like a raw serial port
    pub fn with_baudrate(self, baudrate: u32) -> Self {
        self.lock().baudrate = Some(baudrate);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue bytes for the client to read
    pub fn inject(&self, data: &[u8]) {
        self.lock().incoming.extend(data.iter().copied());
    }

    /// Every chunk passed to `send`, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    pub fn pending(&self) -> usize {
        self.lock().incoming.len()
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.lock().disconnect_calls
    }

    /// Make every following operation fail with an I/O error
    pub fn set_broken(&self, broken: bool) {
        self.lock().broken = broken;
    }

    fn check(state: &MemoryState) -> Result<()> {
        if state.broken {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "memory link broken",
            )));
        }
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        Ok(())
    }
}

impl Link for MemoryLink {
    fn connect(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.connect_calls += 1;
        if state.broken {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory link broken",
            )));
        }
        state.connected = true;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        Self::check(state)?;
        state.sent.push(data.to_vec());
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(data);
            state.incoming.extend(reply);
        }
        Ok(())
    }

    fn recv(&mut self, num_bytes: usize) -> Result<Vec<u8>> {
        let mut state = self.lock();
        Self::check(&state)?;
        if state.incoming.len() < num_bytes {
            return Err(LinkError::timeout(state.timeout, format!("{} bytes", num_bytes)));
        }
        Ok(state.incoming.drain(..num_bytes).collect())
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        Self::check(state)?;
        let bytes = state.incoming.make_contiguous();
        let end = if delimiter.is_empty() {
            Some(0)
        } else {
            bytes
                .windows(delimiter.len())
                .position(|w| w == delimiter)
                .map(|p| p + delimiter.len())
        };
        match end {
            Some(end) => Ok(state.incoming.drain(..end).collect()),
            None => Err(LinkError::timeout(
                state.timeout,
                format!("delimiter {:?}", String::from_utf8_lossy(delimiter)),
            )),
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.disconnect_calls += 1;
        state.connected = false;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.lock().timeout = timeout;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn baudrate(&self) -> Option<u32> {
        self.lock().baudrate
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<()> {
        let mut state = self.lock();
        match state.baudrate {
            Some(_) => {
                state.baudrate = Some(baudrate);
                Ok(())
            }
            None => Err(LinkError::Unsupported("changing baudrate")),
        }
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> MemoryLink {
        let mut link = MemoryLink::new();
        link.connect().unwrap();
        link
    }

    #[test]
    fn test_short_recv_times_out_without_consuming() {
        let mut link = connected();
        link.inject(b"abc");
        assert!(link.recv(4).unwrap_err().is_timeout());
        assert_eq!(link.pending(), 3);
        assert_eq!(link.recv(3).unwrap(), b"abc");
    }

    #[test]
    fn test_recv_until_stops_at_first_delimiter() {
        let mut link = connected();
        link.inject(b"a\nb\n");
        assert_eq!(link.recv_until(b"\n").unwrap(), b"a\n");
        assert_eq!(link.pending(), 2);
        assert_eq!(link.recv_until(b"\n").unwrap(), b"b\n");
        assert!(link.recv_until(b"\n").unwrap_err().is_timeout());
    }

    #[test]
    fn test_responder_replies_to_sends() {
        let mut link = MemoryLink::with_responder(|data| {
            let mut reply = data.to_ascii_uppercase();
            reply.push(b'\n');
            reply
        });
        let observer = link.clone();
        link.connect().unwrap();
        link.send(b"ping").unwrap();
        assert_eq!(link.recv_until(b"\n").unwrap(), b"PING\n");
        assert_eq!(observer.sent(), vec![b"ping".to_vec()]);
        assert_eq!(observer.connect_calls(), 1);
    }

    #[test]
    fn test_broken_link_fails() {
        let mut link = connected();
        link.set_broken(true);
        assert!(matches!(link.send(b"x"), Err(LinkError::Io(_))));
        assert!(link.connect().is_err());
    }

    #[test]
    fn test_baudrate_only_when_serial_like() {
        let mut plain = connected();
        assert!(plain.set_baudrate(9600).is_err());

        let mut serial = MemoryLink::new().with_baudrate(115_200);
        serial.set_baudrate(921_600).unwrap();
        assert_eq!(serial.baudrate(), Some(921_600));
    }
}
