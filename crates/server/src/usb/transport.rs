//! USB transport session
//!
//! Opens a scanner by vendor/product id, selects its configuration,
//! claims the bulk interface and resolves the two bulk endpoints. Every
//! acquired resource is tracked individually so that a partially opened
//! session can still be released deterministically.

use common::TransportOptions;
use rusb::{
    Context, DeviceHandle, Direction, Recipient, RequestType, TransferType, UsbContext,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Byte-level access to an opened scanner
///
/// Implemented by [`UsbSession`] for real hardware and by a scripted
/// transport in tests.
pub trait Transport {
    /// Vendor-specific device-to-host control transfer on endpoint 0
    fn read_control(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> rusb::Result<usize>;

    /// Write all of `data` to the bulk-out endpoint
    fn write_bulk(&mut self, data: &[u8]) -> rusb::Result<usize>;

    /// Read once from the bulk-in endpoint
    ///
    /// Returns `Ok(0)` when the device had nothing to send.
    fn read_bulk(&mut self, buf: &mut [u8]) -> rusb::Result<usize>;
}

/// Per-transfer timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTimeouts {
    pub control: Duration,
    pub bulk_out: Duration,
    /// Wait for data on bulk-in before reporting an empty read
    pub bulk_in: Duration,
}

impl Default for TransferTimeouts {
    fn default() -> Self {
        Self {
            control: Duration::from_secs(5),
            bulk_out: Duration::from_secs(5),
            bulk_in: Duration::from_millis(100),
        }
    }
}

/// A resource that failed to release
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to release {resource}: {source}")]
pub struct ReleaseError {
    pub resource: &'static str,
    pub source: rusb::Error,
}

/// Interface-level operations of an opened device handle
///
/// Implemented by the `rusb` handle; claim and release only go through this.
pub trait InterfaceHandle {
    fn kernel_driver_active(&self, iface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()>;
    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, iface: u8) -> rusb::Result<()>;
    fn set_alternate_setting(&mut self, iface: u8, setting: u8) -> rusb::Result<()>;
}

impl InterfaceHandle for DeviceHandle<Context> {
    fn kernel_driver_active(&self, iface: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, iface)
    }

    fn detach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, iface)
    }

    fn attach_kernel_driver(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, iface)
    }

    fn claim_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, iface)
    }

    fn release_interface(&mut self, iface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, iface)
    }

    fn set_alternate_setting(&mut self, iface: u8, setting: u8) -> rusb::Result<()> {
        DeviceHandle::set_alternate_setting(self, iface, setting)
    }
}

/// Claimed interface bookkeeping
#[derive(Debug, Clone, Copy)]
struct ClaimedInterface {
    number: u8,
    kernel_driver_detached: bool,
}

/// Exclusive ownership of an opened scanner
///
/// Created by [`UsbSession::open`], destroyed by [`UsbSession::close`].
/// Not shareable: one scan at a time.
pub struct UsbSession<H: InterfaceHandle = DeviceHandle<Context>, C = Context> {
    context: Option<C>,
    handle: Option<H>,
    configuration: Option<u8>,
    interface: Option<ClaimedInterface>,
    out_endpoint: Option<u8>,
    in_endpoint: Option<u8>,
    timeouts: TransferTimeouts,
}

impl UsbSession {
    /// Session holding no resources
    pub fn empty(timeouts: TransferTimeouts) -> Self {
        Self::vacant(timeouts)
    }

    /// Open the device and acquire as much of its topology as possible
    ///
    /// Steps run in order: context, device, configuration, interface,
    /// out endpoint, in endpoint. The first failing step is logged and the
    /// session is returned holding only what was acquired before it. Callers
    /// check [`UsbSession::has_device`] before using the session; transfers
    /// on an incomplete session fail with a transport error.
    pub fn open(
        vendor_id: u16,
        product_id: u16,
        opts: &TransportOptions,
        timeouts: TransferTimeouts,
    ) -> Self {
        let mut session = Self::empty(timeouts);
        match session.acquire(vendor_id, product_id, opts) {
            Ok(()) => info!(
                "Opened scanner {:04x}:{:04x} (config {}, interface {}.{}, out {:#04x}, in {:#04x})",
                vendor_id,
                product_id,
                opts.configuration,
                opts.interface,
                opts.alternate_setting,
                opts.out_address(),
                opts.in_address()
            ),
            Err((step, e)) => error!(
                "{} for {:04x}:{:04x} failed: {}",
                step, vendor_id, product_id, e
            ),
        }
        session
    }

    fn acquire(
        &mut self,
        vendor_id: u16,
        product_id: u16,
        opts: &TransportOptions,
    ) -> Result<(), (&'static str, rusb::Error)> {
        let context = Context::new().map_err(|e| ("create usb context", e))?;
        let handle = context.open_device_with_vid_pid(vendor_id, product_id);
        self.context = Some(context);

        let handle = handle.ok_or(("open device with VID/PID", rusb::Error::NotFound))?;
        let handle = self.handle.insert(handle);

        select_configuration(handle, opts.configuration)
            .map_err(|e| ("select usb device config", e))?;
        self.configuration = Some(opts.configuration);

        let claimed = claim_interface(handle, opts.interface, opts.alternate_setting)
            .map_err(|e| ("claim usb device interface", e))?;
        self.interface = Some(claimed);

        let out = find_bulk_endpoint(handle, opts, opts.out_address())
            .map_err(|e| ("open out endpoint", e))?;
        self.out_endpoint = Some(out);

        let inp = find_bulk_endpoint(handle, opts, opts.in_address())
            .map_err(|e| ("open in endpoint", e))?;
        self.in_endpoint = Some(inp);

        Ok(())
    }

    fn handle(&self) -> rusb::Result<&DeviceHandle<Context>> {
        self.handle.as_ref().ok_or(rusb::Error::NoDevice)
    }
}

impl<H: InterfaceHandle, C> UsbSession<H, C> {
    fn vacant(timeouts: TransferTimeouts) -> Self {
        Self {
            context: None,
            handle: None,
            configuration: None,
            interface: None,
            out_endpoint: None,
            in_endpoint: None,
            timeouts,
        }
    }

    /// True when the device itself was opened
    pub fn has_device(&self) -> bool {
        self.handle.is_some()
    }

    /// True when every step of [`UsbSession::open`] succeeded
    pub fn is_complete(&self) -> bool {
        self.in_endpoint.is_some()
    }

    /// Release every acquired resource
    ///
    /// Order: interface, configuration, device, context. Every release is
    /// attempted even after a failure; the first failure is returned and
    /// later ones are only logged. A session that acquired nothing closes
    /// cleanly.
    pub fn close(&mut self) -> Result<(), ReleaseError> {
        let mut teardown = Teardown::default();

        self.out_endpoint = None;
        self.in_endpoint = None;

        if let Some(claimed) = self.interface.take() {
            match self.handle.as_mut() {
                Some(handle) => release_interface(handle, claimed, &mut teardown),
                None => teardown.attempt("usb interface", Err(rusb::Error::NoDevice)),
            }
            debug!("Released interface {}", claimed.number);
        }

        // libusb keeps the selected configuration; there is nothing to undo
        if let Some(config) = self.configuration.take() {
            debug!("Released configuration {}", config);
        }

        if let Some(handle) = self.handle.take() {
            drop(handle);
            debug!("Closed usb device");
        }
        if let Some(context) = self.context.take() {
            drop(context);
            debug!("Closed usb context");
        }

        teardown.finish()
    }
}

impl Transport for UsbSession {
    fn read_control(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> rusb::Result<usize> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        let len = self.handle()?.read_control(
            request_type,
            request,
            value,
            index,
            buf,
            self.timeouts.control,
        )?;
        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, len={}",
            request_type, request, value, index, len
        );
        Ok(len)
    }

    fn write_bulk(&mut self, data: &[u8]) -> rusb::Result<usize> {
        let endpoint = self.out_endpoint.ok_or(rusb::Error::InvalidParam)?;
        let handle = self.handle()?;

        let mut written = 0;
        while written < data.len() {
            let n = handle.write_bulk(endpoint, &data[written..], self.timeouts.bulk_out)?;
            if n == 0 {
                return Err(rusb::Error::Io);
            }
            written += n;
        }
        debug!("Bulk OUT {:#04x}: {} bytes", endpoint, written);
        Ok(written)
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> rusb::Result<usize> {
        let endpoint = self.in_endpoint.ok_or(rusb::Error::InvalidParam)?;
        match self.handle()?.read_bulk(endpoint, buf, self.timeouts.bulk_in) {
            Ok(len) => Ok(len),
            // No data available yet
            Err(rusb::Error::Timeout) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

impl<H: InterfaceHandle, C> Drop for UsbSession<H, C> {
    fn drop(&mut self) {
        if self.handle.is_some() || self.context.is_some() {
            if let Err(e) = self.close() {
                warn!("Releasing dropped usb session: {}", e);
            }
        }
    }
}

fn select_configuration(handle: &mut DeviceHandle<Context>, config: u8) -> rusb::Result<()> {
    if handle.active_configuration()? == config {
        debug!("Configuration {} already active", config);
        return Ok(());
    }
    handle.set_active_configuration(config)
}

/// Claim `number`, detaching an active kernel driver first
///
/// On failure the interface is released and a detached kernel driver is
/// re-attached before the error is returned.
fn claim_interface<H: InterfaceHandle>(
    handle: &mut H,
    number: u8,
    alternate: u8,
) -> rusb::Result<ClaimedInterface> {
    let mut kernel_driver_detached = false;
    match handle.kernel_driver_active(number) {
        Ok(true) => {
            debug!("Detaching kernel driver from interface {}", number);
            handle.detach_kernel_driver(number)?;
            kernel_driver_detached = true;
        }
        Ok(false) => {}
        Err(e) => debug!(
            "Could not check kernel driver status for interface {}: {}",
            number, e
        ),
    }
    let claimed = ClaimedInterface {
        number,
        kernel_driver_detached,
    };

    if let Err(e) = handle.claim_interface(number) {
        restore_kernel_driver(handle, claimed);
        return Err(e);
    }
    if alternate != 0 {
        if let Err(e) = handle.set_alternate_setting(number, alternate) {
            if let Err(release) = handle.release_interface(number) {
                warn!("Failed to release interface {}: {}", number, release);
            }
            restore_kernel_driver(handle, claimed);
            return Err(e);
        }
    }

    debug!("Claimed interface {}.{}", number, alternate);
    Ok(claimed)
}

fn restore_kernel_driver<H: InterfaceHandle>(handle: &mut H, claimed: ClaimedInterface) {
    if claimed.kernel_driver_detached {
        if let Err(e) = handle.attach_kernel_driver(claimed.number) {
            warn!(
                "Failed to re-attach kernel driver to interface {}: {}",
                claimed.number, e
            );
        }
    }
}

fn release_interface<H: InterfaceHandle>(
    handle: &mut H,
    claimed: ClaimedInterface,
    teardown: &mut Teardown,
) {
    teardown.attempt("usb interface", handle.release_interface(claimed.number));
    if claimed.kernel_driver_detached {
        teardown.attempt("kernel driver", handle.attach_kernel_driver(claimed.number));
    }
}

/// Check that `address` is a bulk endpoint of the claimed interface setting
fn find_bulk_endpoint(
    handle: &DeviceHandle<Context>,
    opts: &TransportOptions,
    address: u8,
) -> rusb::Result<u8> {
    let config = handle.device().active_config_descriptor()?;
    let found = config
        .interfaces()
        .filter(|iface| iface.number() == opts.interface)
        .flat_map(|iface| iface.descriptors())
        .filter(|setting| setting.setting_number() == opts.alternate_setting)
        .flat_map(|setting| setting.endpoint_descriptors().collect::<Vec<_>>())
        .any(|ep| ep.address() == address && ep.transfer_type() == TransferType::Bulk);

    if found {
        Ok(address)
    } else {
        Err(rusb::Error::NotFound)
    }
}

/// Ordered release helper keeping the first failure
#[derive(Debug, Default)]
pub(crate) struct Teardown {
    first: Option<ReleaseError>,
}

impl Teardown {
    pub(crate) fn attempt(&mut self, resource: &'static str, result: rusb::Result<()>) {
        if let Err(source) = result {
            let err = ReleaseError { resource, source };
            if self.first.is_none() {
                self.first = Some(err);
            } else {
                warn!("Ignoring subsequent teardown failure: {}", err);
            }
        }
    }

    pub(crate) fn finish(self) -> Result<(), ReleaseError> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
