//! Scanner drivers
//!
//! A driver owns the USB session of one scanner and runs the protocol engine
//! over it. The registry maps a device descriptor to the driver of its vendor
//! family; the Lenovo driver is a thin adapter around the Brother one since
//! both speak the same wire protocol.

pub mod brother;
pub mod engine;
pub mod error;
pub mod lenovo;
pub mod registry;

#[cfg(test)]
pub mod mock;

pub use brother::BrotherScanner;
pub use engine::{EngineSettings, ProtocolEngine, ScanState};
pub use error::{Phase, ScanError};
pub use lenovo::LenovoScanner;
pub use registry::{DeviceRegistry, RegistryEntry};

use crate::usb::TransferTimeouts;
use common::DeviceDescriptor;
use protocol::ScanOptions;
use std::io::Write;

/// Runtime settings every driver is built with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSettings {
    pub engine: EngineSettings,
    pub timeouts: TransferTimeouts,
}

/// Lifecycle of one scanner
///
/// `connect` must succeed before `scan`. After a successful `connect`,
/// `disconnect` must be called exactly once, also when `scan` failed.
pub trait Scanner: Send {
    /// Device this driver was built for
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Open and claim the device
    fn connect(&mut self) -> Result<(), ScanError>;

    /// Run one scan, streaming the raw payload into `out`
    ///
    /// Returns the number of payload bytes written. The caller owns `out`.
    fn scan(&mut self, out: &mut dyn Write, opts: &ScanOptions) -> Result<u64, ScanError>;

    /// Release every resource acquired by `connect`
    fn disconnect(&mut self) -> Result<(), ScanError>;
}
