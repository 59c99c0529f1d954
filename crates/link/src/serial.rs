//! Serial port transport

use crate::buffered::{BufferedLink, CHUNK_SIZE, RawTransport};
use crate::error::{LinkError, Result};
use bytes::BytesMut;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Baudrate every server accepts before negotiation
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// How long the break condition is held during the handshake
pub const BREAK_DURATION: Duration = Duration::from_millis(100);

/// Longest single blocking read, so deadlines are re-checked regularly
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Raw serial transport over the `serialport` crate
pub struct SerialTransport {
    path: String,
    baudrate: u32,
    flow_control: bool,
    port: Option<Box<dyn SerialPort>>,
    read_timeout: Duration,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, flow_control: bool) -> Self {
        Self {
            path: path.into(),
            baudrate: DEFAULT_BAUDRATE,
            flow_control,
            port: None,
            read_timeout: POLL_INTERVAL,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(LinkError::NotConnected)
    }

    /// Hold a break condition, then drop anything the device sent mid-frame
    fn break_handshake(&mut self) -> Result<()> {
        let path = self.path.clone();
        let port = self.port_mut()?;
        port.set_break().map_err(|e| LinkError::from_serial(&path, e))?;
        std::thread::sleep(BREAK_DURATION);
        port.clear_break().map_err(|e| LinkError::from_serial(&path, e))?;
        port.clear(ClearBuffer::All).map_err(|e| LinkError::from_serial(&path, e))?;
        debug!("{}: break handshake complete", path);
        Ok(())
    }
}

impl RawTransport for SerialTransport {
    fn open(&mut self, _timeout: Duration) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let flow_control = if self.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let port = serialport::new(&self.path, self.baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow_control)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| LinkError::from_serial(&self.path, e))?;

        info!(
            "Opened serial port {} at {} baud (flow control: {})",
            self.path, self.baudrate, self.flow_control
        );
        self.port = Some(port);

        if let Err(e) = self.break_handshake() {
            self.port = None;
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.path);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_into(&mut self, buffer: &mut BytesMut, wait: Duration) -> Result<usize> {
        let wait = wait.clamp(Duration::from_millis(1), POLL_INTERVAL);
        let path = self.path.clone();
        let update_timeout = wait != self.read_timeout;
        let port = self.port_mut()?;
        if update_timeout {
            port.set_timeout(wait).map_err(|e| LinkError::from_serial(&path, e))?;
        }
        self.read_timeout = wait;

        let mut chunk = [0u8; CHUNK_SIZE];
        let port = self.port_mut()?;
        match port.read(&mut chunk) {
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        // Reads poll in short slices; the link enforces the overall deadline
        Ok(())
    }

    fn baudrate(&self) -> Option<u32> {
        Some(self.baudrate)
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<()> {
        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(baudrate).map_err(|e| LinkError::from_serial(&self.path, e))?;
            if let Err(e) = port.clear(ClearBuffer::Input) {
                warn!("{}: failed to clear input after baudrate change: {}", self.path, e);
            }
        }
        info!("{}: baudrate set to {}", self.path, baudrate);
        self.baudrate = baudrate;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial {}", self.path)
    }
}

/// Serial link doing blocking I/O on the caller's thread
pub type SerialLink = BufferedLink<SerialTransport>;

impl SerialLink {
    pub fn open_port(path: impl Into<String>, flow_control: bool) -> Self {
        BufferedLink::new(SerialTransport::new(path, flow_control))
    }
}
