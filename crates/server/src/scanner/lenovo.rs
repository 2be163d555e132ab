//! Lenovo scanner driver
//!
//! Lenovo units are rebadged Brother hardware speaking the same protocol
//! byte for byte. Every call is forwarded to an owned Brother driver.

use super::{BrotherScanner, DriverSettings, ScanError, Scanner};
use common::{DeviceDescriptor, TransportOptions};
use protocol::ScanOptions;
use std::io::Write;

pub const LENOVO_VENDOR_ID: u16 = 0x17ef;

pub const LENOVO_TRANSPORT: TransportOptions = TransportOptions {
    configuration: 1,
    interface: 1,
    alternate_setting: 0,
    out_endpoint: 4,
    in_endpoint: 5,
};

pub struct LenovoScanner {
    inner: BrotherScanner,
}

impl LenovoScanner {
    pub fn new(descriptor: DeviceDescriptor, settings: &DriverSettings) -> Self {
        Self {
            inner: BrotherScanner::with_transport(descriptor, LENOVO_TRANSPORT, settings),
        }
    }

    pub fn matches(vendor_id: u16, _product_id: u16) -> bool {
        vendor_id == LENOVO_VENDOR_ID
    }
}

impl Scanner for LenovoScanner {
    fn descriptor(&self) -> &DeviceDescriptor {
        self.inner.descriptor()
    }

    fn connect(&mut self) -> Result<(), ScanError> {
        self.inner.connect()
    }

    fn scan(&mut self, out: &mut dyn Write, opts: &ScanOptions) -> Result<u64, ScanError> {
        self.inner.scan(out, opts)
    }

    fn disconnect(&mut self) -> Result<(), ScanError> {
        self.inner.disconnect()
    }
}
