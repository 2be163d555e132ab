//! USB device identity and topology types shared by the server and its tests

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an attached USB device
///
/// Mirrors the `VID:PID` pair `lsusb` prints, e.g.
/// `Bus 001 Device 002: ID 17ef:5629 Lenovo M7206`. Ids are kept in their
/// hex-string form and parsed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "VendorID", alias = "vendor_id", default)]
    pub vendor_id: String,
    #[serde(rename = "ProductID", alias = "product_id", default)]
    pub product_id: String,
}

impl DeviceDescriptor {
    /// Build a descriptor from numeric ids, rendering them as `0x%04x`
    pub fn from_ids(name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            name: name.into(),
            vendor_id: format_usb_id(vendor_id),
            product_id: format_usb_id(product_id),
        }
    }

    /// Parse a `VID:PID` pair such as `0x04f9:0x60a0` or `04f9:60a0`
    pub fn from_pair(pair: &str) -> Result<Self> {
        let (vid, pid) = pair.split_once(':').ok_or_else(|| Error::InvalidId {
            id: pair.to_string(),
            reason: "expected VID:PID",
        })?;
        Ok(Self::from_ids(String::new(), parse_usb_id(vid)?, parse_usb_id(pid)?))
    }

    /// True when either id is missing
    pub fn is_unspecified(&self) -> bool {
        self.vendor_id.trim().is_empty() || self.product_id.trim().is_empty()
    }

    pub fn parse_vendor_id(&self) -> Result<u16> {
        parse_usb_id(&self.vendor_id)
    }

    pub fn parse_product_id(&self) -> Result<u16> {
        parse_usb_id(&self.product_id)
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vendor_id, self.product_id)?;
        if !self.name.is_empty() {
            write!(f, " ({})", self.name)?;
        }
        Ok(())
    }
}

/// Render a USB id the way descriptors carry it
pub fn format_usb_id(id: u16) -> String {
    format!("0x{:04x}", id)
}

/// Parse a hex USB id with an optional `0x` prefix
///
/// # Example
/// ```
/// use common::usb_types::parse_usb_id;
///
/// assert_eq!(parse_usb_id("0x17ef").unwrap(), 0x17ef);
/// assert_eq!(parse_usb_id("04F9").unwrap(), 0x04f9);
/// assert!(parse_usb_id("0x12345").is_err());
/// ```
pub fn parse_usb_id(id: &str) -> Result<u16> {
    let trimmed = id.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let invalid = |reason| Error::InvalidId {
        id: id.to_string(),
        reason,
    };

    if hex.is_empty() || hex.len() > 4 {
        return Err(invalid("hex part must be 1-4 digits"));
    }
    u16::from_str_radix(hex, 16).map_err(|_| invalid("not a valid hex number"))
}

/// USB topology a driver talks to
///
/// Fixed per driver variant; never derived at runtime. Endpoint values are
/// endpoint numbers without the direction bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub configuration: u8,
    pub interface: u8,
    pub alternate_setting: u8,
    pub out_endpoint: u8,
    pub in_endpoint: u8,
}

impl TransportOptions {
    /// Endpoint address of the bulk-out endpoint
    pub fn out_address(&self) -> u8 {
        self.out_endpoint & 0x0f
    }

    /// Endpoint address of the bulk-in endpoint
    pub fn in_address(&self) -> u8 {
        (self.in_endpoint & 0x0f) | 0x80
    }
}
