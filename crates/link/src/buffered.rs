//! Buffered link over a raw transport
//!
//! OS read primitives return whatever happens to be available. The buffered
//! link accumulates those chunks and only hands out complete answers:
//! exactly `n` bytes, or everything up to a delimiter. Bytes beyond the
//! answer stay buffered for the next call.

use crate::error::{LinkError, Result};
use crate::link::{DEFAULT_TIMEOUT, Link};
use bytes::BytesMut;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Largest single read requested from a transport
pub const CHUNK_SIZE: usize = 4096;

/// A transport that can be opened, written and polled for bytes
pub trait RawTransport: Send {
    fn open(&mut self, timeout: Duration) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Append available bytes to `buffer`, waiting at most `wait`
    ///
    /// Returns the number of bytes appended; zero means nothing arrived.
    fn read_into(&mut self, buffer: &mut BytesMut, wait: Duration) -> Result<usize>;

    /// Apply a new default read timeout
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    fn baudrate(&self) -> Option<u32> {
        None
    }

    fn set_baudrate(&mut self, _baudrate: u32) -> Result<()> {
        Err(LinkError::Unsupported("changing baudrate"))
    }

    fn describe(&self) -> String;
}

/// Position of the first occurrence of `needle` at or after `from`
fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// [`Link`] implementation shared by the serial, socket, USB and worker links
pub struct BufferedLink<T: RawTransport> {
    transport: T,
    buffer: BytesMut,
    timeout: Duration,
    default_timeout: Duration,
}

impl<T: RawTransport> BufferedLink<T> {
    pub fn new(transport: T) -> Self {
        Self::with_timeout(transport, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            buffer: BytesMut::with_capacity(CHUNK_SIZE),
            timeout,
            default_timeout: timeout,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Bytes received but not yet handed out
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Fill the buffer until `ready` reports how many bytes to hand out
    fn fill_until<F>(&mut self, waiting_for: impl FnOnce() -> String, mut ready: F) -> Result<Vec<u8>>
    where
        F: FnMut(&[u8]) -> Option<usize>,
    {
        if !self.transport.is_open() {
            return Err(LinkError::NotConnected);
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(len) = ready(&self.buffer) {
                return Ok(self.buffer.split_to(len).to_vec());
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "{}: timeout with {} bytes buffered",
                    self.transport.describe(),
                    self.buffer.len()
                );
                return Err(LinkError::timeout(self.timeout, waiting_for()));
            }

            let read = self.transport.read_into(&mut self.buffer, deadline - now)?;
            if read > 0 {
                trace!("{}: received {} bytes", self.transport.describe(), read);
            }
        }
    }
}

impl<T: RawTransport> Link for BufferedLink<T> {
    fn connect(&mut self) -> Result<()> {
        self.buffer.clear();
        self.transport.open(self.timeout)
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.transport.is_open() {
            return Err(LinkError::NotConnected);
        }
        trace!("{}: sending {} bytes", self.transport.describe(), data.len());
        self.transport.write_all(data)
    }

    fn recv(&mut self, num_bytes: usize) -> Result<Vec<u8>> {
        self.fill_until(
            || format!("{} bytes", num_bytes),
            |buf| (buf.len() >= num_bytes).then_some(num_bytes),
        )
    }

    fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>> {
        // Resume the scan where the previous fill left off
        let mut scanned = 0;
        self.fill_until(
            || format!("delimiter {:?}", String::from_utf8_lossy(delimiter)),
            |buf| match find_from(buf, delimiter, scanned) {
                Some(pos) => Some(pos + delimiter.len()),
                None => {
                    scanned = buf.len().saturating_sub(delimiter.len().saturating_sub(1));
                    None
                }
            },
        )
    }

    fn disconnect(&mut self) -> Result<()> {
        self.buffer.clear();
        if self.transport.is_open() {
            debug!("{}: disconnecting", self.transport.describe());
            self.transport.close()?;
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        self.transport.set_timeout(timeout)
    }

    fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    fn baudrate(&self) -> Option<u32> {
        self.transport.baudrate()
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<()> {
        self.transport.set_baudrate(baudrate)
    }

    fn describe(&self) -> String {
        self.transport.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    /// Transport replaying scripted chunks, one per read
    struct ScriptedTransport {
        open: bool,
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ScriptedTransport {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                open: false,
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                written: Vec::new(),
            }
        }
    }

    impl RawTransport for ScriptedTransport {
        fn open(&mut self, _timeout: Duration) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn read_into(&mut self, buffer: &mut BytesMut, wait: Duration) -> Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buffer.extend_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => {
                    std::thread::sleep(wait.min(Duration::from_millis(5)));
                    Ok(0)
                }
            }
        }

        fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn link(chunks: &[&[u8]]) -> BufferedLink<ScriptedTransport> {
        let mut link =
            BufferedLink::with_timeout(ScriptedTransport::new(chunks), Duration::from_millis(50));
        link.connect().unwrap();
        link
    }

    #[test]
    fn test_recv_assembles_partial_reads() {
        let mut link = link(&[b"ab", b"c", b"defg"]);
        assert_eq!(link.recv(5).unwrap(), b"abcde");
        assert_eq!(link.buffered_len(), 2);
        assert_eq!(link.recv(2).unwrap(), b"fg");
    }

    #[test]
    fn test_short_read_times_out_and_keeps_data() {
        let mut link = link(&[b"abc"]);
        let err = link.recv(4).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(link.buffered_len(), 3);
    }

    #[test]
    fn test_recv_until_returns_first_occurrence() {
        let mut link = link(&[b"one\ntwo\nthr", b"ee\n"]);
        assert_eq!(link.recv_until(b"\n").unwrap(), b"one\n");
        assert_eq!(link.recv_until(b"\n").unwrap(), b"two\n");
        assert_eq!(link.recv_until(b"\n").unwrap(), b"three\n");
    }

    #[test]
    fn test_recv_until_delimiter_split_across_reads() {
        let mut link = link(&[b"head\r", b"\nrest"]);
        assert_eq!(link.recv_until(b"\r\n").unwrap(), b"head\r\n");
        assert_eq!(link.recv(4).unwrap(), b"rest");
    }

    #[test]
    fn test_recv_until_times_out_without_delimiter() {
        let mut link = link(&[b"no delimiter here"]);
        assert!(link.recv_until(b"\n").unwrap_err().is_timeout());
    }

    #[test]
    fn test_send_reaches_transport() {
        let mut link = link(&[]);
        link.send(b"{\"cmd\":\"start_streaming\"}\n").unwrap();
        assert_eq!(link.transport().written, b"{\"cmd\":\"start_streaming\"}\n");
    }

    #[test]
    fn test_operations_require_connection() {
        let mut link = BufferedLink::new(ScriptedTransport::new(&[]));
        assert!(matches!(link.recv(1), Err(LinkError::NotConnected)));
        assert!(matches!(link.send(b"x"), Err(LinkError::NotConnected)));
        assert!(link.disconnect().is_ok());
    }

    #[test]
    fn test_set_timeout_updates_link() {
        let mut link = link(&[]);
        link.set_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(link.timeout(), Duration::from_millis(10));
        assert_eq!(link.default_timeout(), Duration::from_millis(50));
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_lines(
            lines in proptest::collection::vec("[a-z]{0,12}", 1..6),
            cut in 1usize..7,
        ) {
            let stream: Vec<u8> = lines
                .iter()
                .flat_map(|l| format!("{}\n", l).into_bytes())
                .collect();
            let chunks: Vec<&[u8]> = stream.chunks(cut).collect();
            let mut link = link(&chunks);
            for line in &lines {
                let got = link.recv_until(b"\n").unwrap();
                prop_assert_eq!(got, format!("{}\n", line).into_bytes());
            }
        }
    }

    #[test]
    fn test_find_from() {
        assert_eq!(find_from(b"abcabc", b"bc", 0), Some(1));
        assert_eq!(find_from(b"abcabc", b"bc", 2), Some(4));
        assert_eq!(find_from(b"abc", b"x", 0), None);
        assert_eq!(find_from(b"abc", b"c", 10), None);
    }
}
