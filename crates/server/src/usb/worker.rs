//! USB worker thread
//!
//! Every blocking USB call happens on this thread. Commands arrive from the
//! Tokio runtime over the scan bridge and are handled one at a time, so two
//! scans never share a device.

use crate::scanner::{DeviceRegistry, DriverSettings, ScanError};
use crate::usb::enumerate;
use common::{DeviceDescriptor, ScanCommand, ScanJob, ScanReport, ScanWorker};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::{debug, error, info, warn};

pub struct ScanWorkerThread {
    worker: ScanWorker,
    registry: DeviceRegistry,
    settings: DriverSettings,
}

impl ScanWorkerThread {
    pub fn new(worker: ScanWorker, registry: DeviceRegistry, settings: DriverSettings) -> Self {
        Self {
            worker,
            registry,
            settings,
        }
    }

    /// Handle commands until `Shutdown` or until every bridge is dropped
    pub fn run(self) {
        info!(
            "Scan worker thread started (drivers: {})",
            self.registry.names().join(", ")
        );

        loop {
            match self.worker.recv_command() {
                Ok(ScanCommand::Shutdown) => {
                    info!("Scan worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Scan bridge closed: {}", e);
                    break;
                }
            }
        }

        info!("Scan worker thread stopped");
    }

    fn handle_command(&self, cmd: ScanCommand) {
        // A panicking driver must not take the worker down with it
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.handle_command_inner(cmd)));

        if let Err(e) = result {
            error!("Panic in scan command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&self, cmd: ScanCommand) {
        match cmd {
            ScanCommand::ListDevices { response } => {
                let devices = list_devices_or_empty();
                debug!("Listing {} devices", devices.len());
                let _ = response.send(devices);
            }

            ScanCommand::Scan { job, response } => {
                let result = self.run_scan(&job).map_err(|e| {
                    error!("Scan of {} failed: {}", job.device, e);
                    common::Error::from(e)
                });
                let _ = response.send(result);
            }

            ScanCommand::Shutdown => {
                // Handled in the main loop
            }
        }
    }

    /// Resolve, connect, scan, disconnect
    ///
    /// The output file is removed again when the scan fails.
    pub fn run_scan(&self, job: &ScanJob) -> Result<ScanReport, ScanError> {
        let mut scanner = self.registry.resolve(&job.device, &self.settings)?;

        let file = File::create(&job.output).map_err(ScanError::Sink)?;
        let mut out = BufWriter::new(file);

        let result = match scanner.connect() {
            Ok(()) => {
                let scanned = scanner.scan(&mut out, &job.options);
                let disconnected = scanner.disconnect();
                match (scanned, disconnected) {
                    (Ok(bytes), Ok(())) => Ok(bytes),
                    (Ok(_), Err(e)) => Err(e),
                    (Err(e), Ok(())) => Err(e),
                    (Err(e), Err(teardown)) => {
                        warn!("Disconnect after failed scan also failed: {}", teardown);
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        };
        let result = result.and_then(|bytes| out.flush().map(|()| bytes).map_err(ScanError::Sink));
        drop(out);

        match result {
            Ok(bytes_written) => {
                info!(
                    "Scanned {} bytes from {} into {}",
                    bytes_written,
                    job.device,
                    job.output.display()
                );
                Ok(ScanReport {
                    output: job.output.clone(),
                    bytes_written,
                })
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&job.output) {
                    warn!(
                        "Failed to remove partial output {}: {}",
                        job.output.display(),
                        rm
                    );
                }
                Err(e)
            }
        }
    }
}

fn list_devices_or_empty() -> Vec<DeviceDescriptor> {
    match enumerate::list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Failed to enumerate USB devices: {}", e);
            Vec::new()
        }
    }
}

/// Spawn the scan worker thread
///
/// The thread runs until a `Shutdown` command arrives or the bridge closes.
pub fn spawn_scan_worker(
    worker: ScanWorker,
    registry: DeviceRegistry,
    settings: DriverSettings,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("scan-worker".to_string())
        .spawn(move || ScanWorkerThread::new(worker, registry, settings).run())
}
