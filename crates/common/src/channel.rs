//! Async channel bridge between Tokio runtime and the USB worker thread
//!
//! All blocking USB work happens on one dedicated thread. The Tokio side
//! sends commands, each carrying a oneshot reply sender; the worker handles
//! them strictly one at a time, which also serialises scans.

use crate::usb_types::DeviceDescriptor;
use async_channel::{Receiver, Sender, bounded};
use protocol::ScanOptions;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// A single scan to run on the worker thread
#[derive(Debug, Clone)]
pub struct ScanJob {
    /// Device to scan from
    pub device: DeviceDescriptor,
    /// Requested scan parameters
    pub options: ScanOptions,
    /// File the image payload is written to
    pub output: PathBuf,
}

/// Outcome of a successful scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// File holding the payload
    pub output: PathBuf,
    /// Payload bytes written
    pub bytes_written: u64,
}

/// Commands from Tokio runtime to the USB worker thread
#[derive(Debug)]
pub enum ScanCommand {
    /// List attached USB devices
    ListDevices {
        /// Channel to send response back
        response: oneshot::Sender<Vec<DeviceDescriptor>>,
    },

    /// Run one scan end to end
    Scan {
        job: ScanJob,
        /// Channel to send response back
        response: oneshot::Sender<crate::Result<ScanReport>>,
    },

    /// Shutdown the worker thread gracefully
    Shutdown,
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct ScanBridge {
    cmd_tx: Sender<ScanCommand>,
}

impl ScanBridge {
    /// Send a command to the worker thread
    pub async fn send_command(&self, cmd: ScanCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Ask the worker for the attached devices
    pub async fn list_devices(&self) -> crate::Result<Vec<DeviceDescriptor>> {
        let (response, rx) = oneshot::channel();
        self.send_command(ScanCommand::ListDevices { response })
            .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Queue a scan and wait for its outcome
    pub async fn scan(&self, job: ScanJob) -> crate::Result<ScanReport> {
        let (response, rx) = oneshot::channel();
        self.send_command(ScanCommand::Scan { job, response })
            .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))?
    }

    /// Ask the worker to stop after the command in progress
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.send_command(ScanCommand::Shutdown).await
    }
}

/// Handle for the worker thread (blocking)
pub struct ScanWorker {
    pub(crate) cmd_rx: Receiver<ScanCommand>,
}

impl ScanWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<ScanCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and the worker thread
///
/// Returns (ScanBridge for Tokio, ScanWorker for the worker thread)
pub fn create_scan_bridge() -> (ScanBridge, ScanWorker) {
    let (cmd_tx, cmd_rx) = bounded(32);

    (ScanBridge { cmd_tx }, ScanWorker { cmd_rx })
}
