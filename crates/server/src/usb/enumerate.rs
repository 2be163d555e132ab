//! USB device enumeration
//!
//! Lists attached devices so a scan without an explicit device can pick the
//! first one. Root hubs and host controllers are skipped.

use common::DeviceDescriptor;
use rusb::{Context, Device, UsbContext};
use tracing::{debug, warn};

/// Linux Foundation, vendor of the virtual root hubs
const ROOT_HUB_VENDOR_ID: u16 = 0x1d6b;
const HUB_CLASS: u8 = 9;

/// List attached devices, skipping root hubs and host controllers
pub fn list_devices() -> rusb::Result<Vec<DeviceDescriptor>> {
    let context = Context::new()?;
    let mut found = Vec::new();

    for device in context.devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                warn!(
                    "Skipping device bus={} addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                continue;
            }
        };

        if is_root_hub(desc.vendor_id(), desc.class_code()) {
            debug!(
                "Skipping root hub: vid={:#x}, pid={:#x}",
                desc.vendor_id(),
                desc.product_id()
            );
            continue;
        }

        let manufacturer = read_manufacturer(&device, &desc);
        if is_host_controller(&manufacturer) {
            debug!("Skipping host controller '{}'", manufacturer);
            continue;
        }

        found.push(DeviceDescriptor::from_ids(
            manufacturer,
            desc.vendor_id(),
            desc.product_id(),
        ));
    }

    debug!("Enumerated {} devices", found.len());
    Ok(found)
}

fn read_manufacturer(device: &Device<Context>, desc: &rusb::DeviceDescriptor) -> String {
    device
        .open()
        .ok()
        .and_then(|handle| {
            desc.manufacturer_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
        })
        .unwrap_or_default()
}

pub fn is_root_hub(vendor_id: u16, class_code: u8) -> bool {
    vendor_id == ROOT_HUB_VENDOR_ID && class_code == HUB_CLASS
}

/// Name heuristic for xHCI host controllers
pub fn is_host_controller(manufacturer: &str) -> bool {
    manufacturer.to_ascii_lowercase().contains("xhci")
}
