//! Device registry
//!
//! An ordered list of driver entries built once at startup. Resolution walks
//! the entries in order and the first matching entry wins, so the order is
//! part of the contract. The default order is Brother, then Lenovo.

use super::{BrotherScanner, DriverSettings, LenovoScanner, ScanError, Scanner};
use common::DeviceDescriptor;
use tracing::debug;

/// Accepts or rejects a device by its parsed vendor and product id
pub type Matcher = fn(u16, u16) -> bool;

/// Builds a driver; must not touch the device
pub type Constructor = fn(DeviceDescriptor, &DriverSettings) -> Box<dyn Scanner>;

#[derive(Clone)]
pub struct RegistryEntry {
    pub name: &'static str,
    pub matcher: Matcher,
    pub constructor: Constructor,
}

impl RegistryEntry {
    pub fn new(name: &'static str, matcher: Matcher, constructor: Constructor) -> Self {
        Self {
            name,
            matcher,
            constructor,
        }
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    entries: Vec<RegistryEntry>,
}

impl DeviceRegistry {
    pub fn new(entries: Vec<RegistryEntry>) -> Self {
        Self { entries }
    }

    /// Registry with every supported vendor family
    pub fn with_default_drivers() -> Self {
        Self::new(vec![
            RegistryEntry::new("brother", BrotherScanner::matches, |desc, settings| {
                Box::new(BrotherScanner::new(desc, settings))
            }),
            RegistryEntry::new("lenovo", LenovoScanner::matches, |desc, settings| {
                Box::new(LenovoScanner::new(desc, settings))
            }),
        ])
    }

    /// Append an entry after all existing ones
    ///
    /// Only meant for startup, before the registry is handed to the worker.
    pub fn register(&mut self, entry: RegistryEntry) {
        self.entries.push(entry);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// Build the driver of the first entry accepting `descriptor`
    pub fn resolve(
        &self,
        descriptor: &DeviceDescriptor,
        settings: &DriverSettings,
    ) -> Result<Box<dyn Scanner>, ScanError> {
        let vendor_id = descriptor.parse_vendor_id()?;
        let product_id = descriptor.parse_product_id()?;

        let entry = self
            .entries
            .iter()
            .find(|entry| (entry.matcher)(vendor_id, product_id))
            .ok_or_else(|| ScanError::NoMatchingDevice {
                vendor_id: descriptor.vendor_id.clone(),
                product_id: descriptor.product_id.clone(),
            })?;

        debug!("Resolved {} to driver '{}'", descriptor, entry.name);
        Ok((entry.constructor)(descriptor.clone(), settings))
    }
}
