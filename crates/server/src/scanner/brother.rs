//! Brother scanner driver

use super::engine::ProtocolEngine;
use super::{DriverSettings, ScanError, Scanner};
use crate::usb::UsbSession;
use common::{DeviceDescriptor, TransportOptions};
use protocol::ScanOptions;
use std::io::Write;
use tracing::{info, warn};

pub const BROTHER_VENDOR_ID: u16 = 0x04f9;

/// Bulk interface of Brother scanners
pub const BROTHER_TRANSPORT: TransportOptions = TransportOptions {
    configuration: 1,
    interface: 1,
    alternate_setting: 0,
    out_endpoint: 4,
    in_endpoint: 5,
};

pub struct BrotherScanner {
    descriptor: DeviceDescriptor,
    transport: TransportOptions,
    settings: DriverSettings,
    session: Option<UsbSession>,
}

impl BrotherScanner {
    pub fn new(descriptor: DeviceDescriptor, settings: &DriverSettings) -> Self {
        Self::with_transport(descriptor, BROTHER_TRANSPORT, settings)
    }

    /// Driver talking to a different interface layout with the same protocol
    pub fn with_transport(
        descriptor: DeviceDescriptor,
        transport: TransportOptions,
        settings: &DriverSettings,
    ) -> Self {
        Self {
            descriptor,
            transport,
            settings: settings.clone(),
            session: None,
        }
    }

    pub fn matches(vendor_id: u16, _product_id: u16) -> bool {
        vendor_id == BROTHER_VENDOR_ID
    }

    pub fn transport_options(&self) -> &TransportOptions {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

impl Scanner for BrotherScanner {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn connect(&mut self) -> Result<(), ScanError> {
        if self.session.is_some() {
            return Ok(());
        }

        let vendor_id = self.descriptor.parse_vendor_id()?;
        let product_id = self.descriptor.parse_product_id()?;

        let mut session = UsbSession::open(
            vendor_id,
            product_id,
            &self.transport,
            self.settings.timeouts,
        );
        if !session.has_device() {
            if let Err(e) = session.close() {
                warn!("Releasing partially opened session: {}", e);
            }
            return Err(ScanError::OpenFailed {
                vendor_id,
                product_id,
            });
        }

        if !session.is_complete() {
            warn!(
                "Session for {} is incomplete, transfers on it will fail",
                self.descriptor
            );
        }

        info!("Connected to {}", self.descriptor);
        self.session = Some(session);
        Ok(())
    }

    fn scan(&mut self, out: &mut dyn Write, opts: &ScanOptions) -> Result<u64, ScanError> {
        let session = self.session.as_mut().ok_or(ScanError::NotConnected)?;
        info!(
            "Scanning {} at {} DPI, mode {}, compression {}",
            self.descriptor, opts.dpi, opts.mode, opts.compression
        );
        ProtocolEngine::new(session, &self.settings.engine).run(out, opts)
    }

    fn disconnect(&mut self) -> Result<(), ScanError> {
        match self.session.take() {
            Some(mut session) => {
                session.close()?;
                info!("Disconnected from {}", self.descriptor);
                Ok(())
            }
            None => Ok(()),
        }
    }
}
