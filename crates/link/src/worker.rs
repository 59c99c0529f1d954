//! Serial link backed by a dedicated I/O worker thread
//!
//! The worker thread owns the [`SerialTransport`] and runs the blocking
//! read loop. The link side talks to it through the channel bridge from
//! `common` and never touches the port itself, so a stalled device can only
//! ever cost the caller one bounded channel receive.

use crate::buffered::{BufferedLink, RawTransport};
use crate::error::{LinkError, Result};
use crate::serial::{BREAK_DURATION, DEFAULT_BAUDRATE, SerialTransport};
use bytes::BytesMut;
use common::{SerialBridge, SerialWorker, WorkerCommand, create_serial_bridge};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long the worker blocks on the port before checking for commands
const WORKER_POLL: Duration = Duration::from_millis(10);

/// Extra allowance for the worker to open the port and finish the handshake
const STARTUP_GRACE: Duration = Duration::from_secs(1);

/// Link-side transport forwarding to the worker thread
pub struct WorkerTransport {
    path: String,
    flow_control: bool,
    baudrate: u32,
    bridge: Option<SerialBridge>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerTransport {
    pub fn new(path: impl Into<String>, flow_control: bool) -> Self {
        Self {
            path: path.into(),
            flow_control,
            baudrate: DEFAULT_BAUDRATE,
            bridge: None,
            handle: None,
        }
    }

    fn bridge(&self) -> Result<&SerialBridge> {
        self.bridge.as_ref().ok_or(LinkError::NotConnected)
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("serial worker for {} panicked", self.path);
        }
    }
}

impl RawTransport for WorkerTransport {
    fn open(&mut self, timeout: Duration) -> Result<()> {
        if self.bridge.is_some() {
            return Ok(());
        }

        let (bridge, worker) = create_serial_bridge();
        let transport = SerialTransport::new(self.path.clone(), self.flow_control);
        let baudrate = self.baudrate;

        let handle = std::thread::Builder::new()
            .name("serial-worker".to_string())
            .spawn(move || run_worker(transport, baudrate, worker))?;
        self.handle = Some(handle);

        let ready = bridge.wait_ready(timeout + BREAK_DURATION + STARTUP_GRACE);
        match ready {
            Ok(true) => {
                info!("Serial worker for {} is ready", self.path);
                self.bridge = Some(bridge);
                Ok(())
            }
            Ok(false) => {
                let _ = bridge.send_command(WorkerCommand::Shutdown);
                drop(bridge);
                self.join_worker();
                Err(LinkError::timeout(timeout, "serial worker startup"))
            }
            Err(e) => {
                drop(bridge);
                self.join_worker();
                Err(e.into())
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(bridge) = self.bridge.take() {
            if let Err(e) = bridge.send_command(WorkerCommand::Shutdown) {
                debug!("serial worker already gone: {}", e);
            }
            // Unblocks a worker waiting to hand over data
            drop(bridge);
        }
        self.join_worker();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.bridge.is_some()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.bridge()?
            .send_command(WorkerCommand::Write(data.to_vec()))?;
        Ok(())
    }

    fn read_into(&mut self, buffer: &mut BytesMut, wait: Duration) -> Result<usize> {
        match self.bridge()?.recv_data_timeout(wait)? {
            Some(chunk) => {
                buffer.extend_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn baudrate(&self) -> Option<u32> {
        Some(self.baudrate)
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<()> {
        if let Some(bridge) = &self.bridge {
            bridge.send_command(WorkerCommand::SetBaudrate(baudrate))?;
            // Bytes queued at the old rate are garbage
            bridge.discard_pending();
        }
        self.baudrate = baudrate;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial worker {}", self.path)
    }
}

impl Drop for WorkerTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Worker thread body: open the port, then shuttle bytes until shut down
fn run_worker(mut transport: SerialTransport, baudrate: u32, worker: SerialWorker) {
    if baudrate != DEFAULT_BAUDRATE
        && let Err(e) = transport.set_baudrate(baudrate)
    {
        worker.mark_failed(e.to_string());
        return;
    }

    if let Err(e) = transport.open(WORKER_POLL) {
        error!("Serial worker failed to open {}: {}", transport.path(), e);
        worker.mark_failed(e.to_string());
        return;
    }
    worker.mark_ready();
    debug!("Serial worker running for {}", transport.path());

    let mut buffer = BytesMut::new();
    loop {
        while let Some(cmd) = worker.try_recv_command() {
            let outcome = match cmd {
                WorkerCommand::Write(data) => transport.write_all(&data),
                WorkerCommand::SetBaudrate(rate) => transport.set_baudrate(rate),
                WorkerCommand::Shutdown => {
                    let _ = transport.close();
                    debug!("Serial worker for {} stopped", transport.path());
                    return;
                }
            };
            if let Err(e) = outcome {
                error!("Serial worker for {}: {}", transport.path(), e);
                worker.mark_failed(e.to_string());
                let _ = transport.close();
                return;
            }
        }

        match transport.read_into(&mut buffer, WORKER_POLL) {
            Ok(0) => {}
            Ok(_) => {
                let chunk = buffer.split().to_vec();
                if worker.send_data(chunk).is_err() {
                    let _ = transport.close();
                    return;
                }
            }
            Err(e) => {
                error!("Serial worker for {}: {}", transport.path(), e);
                worker.mark_failed(e.to_string());
                let _ = transport.close();
                return;
            }
        }
    }
}

/// Serial link whose blocking I/O runs on a worker thread
pub type SerialWorkerLink = BufferedLink<WorkerTransport>;

impl SerialWorkerLink {
    pub fn open_port(path: impl Into<String>, flow_control: bool) -> Self {
        BufferedLink::new(WorkerTransport::new(path, flow_control))
    }
}
