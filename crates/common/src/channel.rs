//! Channel bridge between a serial link and its I/O worker thread
//!
//! The worker owns the serial port and runs a blocking read loop. The link
//! side only ever blocks on channel receives bounded by its own timeout.
//! Two flags complete the picture: `ready` once the port is open and
//! synchronized, `failed` once the worker has given up.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Capacity of each direction
pub const BRIDGE_CAPACITY: usize = 256;

/// Commands from the link to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Write these bytes to the port
    Write(Vec<u8>),
    /// Reconfigure the port baudrate
    SetBaudrate(u32),
    /// Close the port and exit
    Shutdown,
}

#[derive(Debug, Default)]
struct WorkerSignals {
    ready: AtomicBool,
    failed: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Link-side handle
pub struct SerialBridge {
    cmd_tx: Sender<WorkerCommand>,
    data_rx: Receiver<Vec<u8>>,
    signals: Arc<WorkerSignals>,
}

impl SerialBridge {
    /// Queue a command for the worker
    pub fn send_command(&self, cmd: WorkerCommand) -> crate::Result<()> {
        self.check_failed()?;
        self.cmd_tx
            .send(cmd)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Wait up to `timeout` for the next chunk of received bytes
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    pub fn recv_data_timeout(&self, timeout: Duration) -> crate::Result<Option<Vec<u8>>> {
        match self.data_rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => {
                self.check_failed()?;
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.check_failed()?;
                Err(crate::Error::Channel("serial worker exited".to_string()))
            }
        }
    }

    /// Drop every chunk already received
    pub fn discard_pending(&self) {
        while self.data_rx.try_recv().is_ok() {}
    }

    pub fn is_ready(&self) -> bool {
        self.signals.ready.load(Ordering::Acquire)
    }

    pub fn has_failed(&self) -> bool {
        self.signals.failed.load(Ordering::Acquire)
    }

    /// Block until the worker reports ready, fails, or `timeout` elapses
    pub fn wait_ready(&self, timeout: Duration) -> crate::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_failed()?;
            if self.is_ready() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn check_failed(&self) -> crate::Result<()> {
        if !self.has_failed() {
            return Ok(());
        }
        let reason = self
            .signals
            .reason
            .lock()
            .ok()
            .and_then(|r| r.clone())
            .unwrap_or_else(|| "unknown failure".to_string());
        Err(crate::Error::Worker(reason))
    }
}

/// Worker-side handle
pub struct SerialWorker {
    cmd_rx: Receiver<WorkerCommand>,
    data_tx: Sender<Vec<u8>>,
    signals: Arc<WorkerSignals>,
}

impl SerialWorker {
    /// Try to receive a command without blocking
    ///
    /// A dropped link is reported as [`WorkerCommand::Shutdown`].
    pub fn try_recv_command(&self) -> Option<WorkerCommand> {
        match self.cmd_rx.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(WorkerCommand::Shutdown),
        }
    }

    /// Hand received bytes to the link (blocks while the link lags behind)
    pub fn send_data(&self, data: Vec<u8>) -> crate::Result<()> {
        self.data_tx
            .send(data)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    pub fn mark_ready(&self) {
        self.signals.ready.store(true, Ordering::Release);
    }

    pub fn mark_failed(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.signals.reason.lock() {
            *slot = Some(reason.into());
        }
        self.signals.failed.store(true, Ordering::Release);
    }
}

/// Create the channel bridge between a serial link and its worker
///
/// Returns (SerialBridge for the link, SerialWorker for the worker thread)
pub fn create_serial_bridge() -> (SerialBridge, SerialWorker) {
    let (cmd_tx, cmd_rx) = bounded(BRIDGE_CAPACITY);
    let (data_tx, data_rx) = bounded(BRIDGE_CAPACITY);
    let signals = Arc::new(WorkerSignals::default());

    (
        SerialBridge {
            cmd_tx,
            data_rx,
            signals: signals.clone(),
        },
        SerialWorker {
            cmd_rx,
            data_tx,
            signals,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_bridge() {
        let (bridge, worker) = create_serial_bridge();

        let handle = std::thread::spawn(move || {
            worker.mark_ready();
            loop {
                match worker.try_recv_command() {
                    Some(WorkerCommand::Write(data)) => worker.send_data(data).unwrap(),
                    Some(WorkerCommand::Shutdown) => break,
                    Some(WorkerCommand::SetBaudrate(_)) | None => {
                        std::thread::sleep(Duration::from_millis(1))
                    }
                }
            }
        });

        assert!(bridge.wait_ready(Duration::from_secs(5)).unwrap());
        bridge
            .send_command(WorkerCommand::Write(b"echo".to_vec()))
            .unwrap();
        let chunk = bridge.recv_data_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.as_deref(), Some(&b"echo"[..]));

        bridge.send_command(WorkerCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_recv_timeout_returns_none() {
        let (bridge, _worker) = create_serial_bridge();
        let chunk = bridge.recv_data_timeout(Duration::from_millis(10)).unwrap();
        assert!(chunk.is_none());
    }

    #[test]
    fn test_failure_is_reported() {
        let (bridge, worker) = create_serial_bridge();
        worker.mark_failed("port vanished");
        let err = bridge.wait_ready(Duration::from_millis(10)).unwrap_err();
        assert!(err.to_string().contains("port vanished"));
        assert!(bridge.send_command(WorkerCommand::Shutdown).is_err());
    }

    #[test]
    fn test_dropped_bridge_reads_as_shutdown() {
        let (bridge, worker) = create_serial_bridge();
        drop(bridge);
        assert_eq!(worker.try_recv_command(), Some(WorkerCommand::Shutdown));
    }
}
