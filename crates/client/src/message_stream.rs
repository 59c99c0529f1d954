//! Message framing on top of a link
//!
//! Each inbound unit is a JSON header terminated by the protocol end
//! sequence, followed by `payload_size` bytes of binary payload. The stream
//! reads one unit at a time and hands it to the active protocol variant for
//! classification.
//!
//! Transport failures and undecodable headers are reported to the error
//! callback before they are returned, so the owner can tear down in one
//! place.

use crate::error::{Error, Result};
use link::Link;
use protocol::{
    END_SEQUENCE, Message, MessageKind, ProtocolVariant, decode_header, payload_size,
};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Invoked with every fatal stream error before it is returned
pub type ErrorCallback = Box<dyn FnMut(&Error) + Send>;

pub struct MessageStream {
    link: Box<dyn Link>,
    protocol: ProtocolVariant,
    on_error: Option<ErrorCallback>,
}

impl MessageStream {
    pub fn new(link: Box<dyn Link>, protocol: ProtocolVariant) -> Self {
        Self {
            link,
            protocol,
            on_error: None,
        }
    }

    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Error) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn protocol(&self) -> ProtocolVariant {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: ProtocolVariant) {
        self.protocol = protocol;
    }

    pub fn link(&self) -> &dyn Link {
        self.link.as_ref()
    }

    pub fn link_mut(&mut self) -> &mut dyn Link {
        self.link.as_mut()
    }

    pub fn into_link(self) -> Box<dyn Link> {
        self.link
    }

    fn fail(&mut self, err: Error) -> Error {
        if let Some(callback) = self.on_error.as_mut() {
            callback(&err);
        }
        err
    }

    /// Send one encoded command
    pub fn send(&mut self, command: &[u8]) -> Result<()> {
        trace!("Sending {}", String::from_utf8_lossy(command).trim_end());
        self.link
            .send(command)
            .map_err(|e| self.fail(Error::Link(e)))
    }

    /// Read and classify the next message
    pub fn next_message(&mut self) -> Result<Message> {
        let header_bytes = self
            .link
            .recv_until(END_SEQUENCE)
            .map_err(|e| self.fail(Error::Link(e)))?;
        let header = decode_header(&header_bytes).map_err(|e| self.fail(Error::Protocol(e)))?;
        let size = payload_size(&header).map_err(|e| self.fail(Error::Protocol(e)))?;

        let payload = if size > 0 {
            self.link
                .recv(size)
                .map_err(|e| self.fail(Error::Link(e)))?
        } else {
            Vec::new()
        };

        let message = self.protocol.parse_message(&header, payload)?;
        trace!("Received {} ({} payload bytes)", message.kind(), size);
        Ok(message)
    }

    /// Read messages until one of `expected` kind arrives
    ///
    /// Every other message is passed to `handler`, which may turn it into an
    /// error. With a `timeout`, giving up after it elapses fails with
    /// [`Error::MessageStream`].
    pub fn wait_for_message<F>(
        &mut self,
        expected: MessageKind,
        timeout: Option<Duration>,
        mut handler: F,
    ) -> Result<Message>
    where
        F: FnMut(Message) -> Result<()>,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::MessageStream(format!(
                    "Timed out waiting for {}",
                    expected
                )));
            }
            if !self.link.is_connected() {
                return Err(Error::MessageStream(format!(
                    "Stream closed while waiting for {}",
                    expected
                )));
            }

            let message = self.next_message()?;
            if message.kind() == expected {
                debug!("Got {}", expected);
                return Ok(message);
            }
            handler(message)?;
        }
    }
}

impl Iterator for MessageStream {
    type Item = Result<Message>;

    /// Yields messages while the link is connected
    fn next(&mut self) -> Option<Self::Item> {
        if !self.link.is_connected() {
            return None;
        }
        Some(self.next_message())
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("link", &self.link.describe())
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link::{LinkError, MemoryLink};
    use protocol::{LogLevel, LogMessage, encode_message};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stream_with(frames: &[u8]) -> (MessageStream, MemoryLink) {
        let mut link = MemoryLink::new();
        link.connect().unwrap();
        link.inject(frames);
        (
            MessageStream::new(Box::new(link.clone()), ProtocolVariant::Current),
            link,
        )
    }

    #[test]
    fn test_zero_payload_reads_next_header() {
        let mut frames = b"{\"start_streaming\":{},\"payload_size\":0}\n".to_vec();
        frames.extend_from_slice(b"{\"stop_streaming\":{}}\n");
        let (mut stream, link) = stream_with(&frames);

        assert_eq!(stream.next_message().unwrap(), Message::StartStreaming);
        assert_eq!(stream.next_message().unwrap(), Message::StopStreaming);
        assert_eq!(link.pending(), 0);
    }

    #[test]
    fn test_payload_is_read_after_header() {
        let config = common::test_utils::create_session_config(1);
        let result = common::test_utils::create_mock_result(&config, 42);
        let (mut stream, _link) = stream_with(&encode_message(&result));
        assert_eq!(stream.next_message().unwrap(), result);
    }

    #[test]
    fn test_wait_forwards_other_messages() {
        let log = Message::Log(LogMessage {
            level: LogLevel::Info,
            timestamp: 1,
            module: "sensor".to_string(),
            log: "calibrating".to_string(),
        });
        let mut frames = encode_message(&log);
        frames.extend(encode_message(&Message::StartStreaming));
        let (mut stream, _link) = stream_with(&frames);

        let mut forwarded = Vec::new();
        let message = stream
            .wait_for_message(MessageKind::StartStreaming, None, |m| {
                forwarded.push(m);
                Ok(())
            })
            .unwrap();

        assert_eq!(message, Message::StartStreaming);
        assert_eq!(forwarded, vec![log]);
    }

    #[test]
    fn test_wait_deadline_names_expected_kind() {
        let (mut stream, _link) = stream_with(&encode_message(&Message::StopStreaming));
        let err = stream
            .wait_for_message(MessageKind::SetupResponse, Some(Duration::ZERO), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, Error::MessageStream(ref m) if m.contains("setup response")));
    }

    #[test]
    fn test_failures_reach_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let (stream, _link) = stream_with(b"not json\n");
        let mut stream = stream.with_error_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(matches!(stream.next_message(), Err(Error::Protocol(_))));
        assert!(matches!(
            stream.next_message(),
            Err(Error::Link(LinkError::Timeout { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_iterator_stops_when_link_closes() {
        let (mut stream, mut link) = stream_with(&encode_message(&Message::StartStreaming));
        assert!(matches!(stream.next(), Some(Ok(Message::StartStreaming))));
        link.disconnect().unwrap();
        assert!(stream.next().is_none());
    }
}
