//! USB subsystem
//!
//! Transport sessions, device enumeration and the worker thread that owns
//! every blocking USB call. Nothing in here runs on the Tokio runtime.

pub mod enumerate;
pub mod transport;
pub mod worker;

pub use enumerate::list_devices;
pub use transport::{ReleaseError, TransferTimeouts, Transport, UsbSession};
pub use worker::{ScanWorkerThread, spawn_scan_worker};
