//! TCP socket transport

use crate::buffered::{BufferedLink, CHUNK_SIZE, RawTransport};
use crate::error::{LinkError, Result};
use bytes::BytesMut;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// Plain TCP transport to an exploration server
pub struct SocketTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl SocketTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(LinkError::NotConnected)
    }
}

impl RawTransport for SocketTransport {
    fn open(&mut self, timeout: Duration) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let target = format!("{}:{}", self.host, self.port);
        let mut last_err = None;
        for addr in target.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    info!("Connected to {}", addr);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connecting to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) if e.kind() == ErrorKind::TimedOut => {
                LinkError::timeout(timeout, format!("connection to {}", target))
            }
            Some(e) => LinkError::Io(e),
            None => LinkError::DeviceNotFound(format!("no address for {}", target)),
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            // The peer may already have gone away
            let _ = stream.shutdown(Shutdown::Both);
            info!("Disconnected from {}:{}", self.host, self.port);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream_mut()?.write_all(data)?;
        Ok(())
    }

    fn read_into(&mut self, buffer: &mut BytesMut, wait: Duration) -> Result<usize> {
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(wait.max(Duration::from_millis(1))))?;

        let mut chunk = [0u8; CHUNK_SIZE];
        match stream.read(&mut chunk) {
            Ok(0) => Err(LinkError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "server closed the connection",
            ))),
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(Some(timeout))?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("socket {}:{}", self.host, self.port)
    }
}

pub type SocketLink = BufferedLink<SocketTransport>;

impl SocketLink {
    pub fn open_socket(host: impl Into<String>, port: u16) -> Self {
        BufferedLink::new(SocketTransport::new(host, port))
    }
}
