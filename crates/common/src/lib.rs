//! Common utilities for usb-scan
//!
//! This crate provides shared functionality for the scanner server,
//! including device identity types, error handling, logging setup, and the
//! async channel bridge to the USB worker thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use channel::{ScanBridge, ScanCommand, ScanJob, ScanReport, ScanWorker, create_scan_bridge};
pub use error::{Error, Result, ScanFailureKind};
pub use logging::{LogFormat, setup_logging};
pub use usb_types::{DeviceDescriptor, TransportOptions, format_usb_id, parse_usb_id};
