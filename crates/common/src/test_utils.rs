//! Test utilities for usb-scan
//!
//! Provides mock descriptors and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_descriptor;
//!
//! let device = create_mock_descriptor(0x04f9, 0x60a0);
//! assert_eq!(device.vendor_id, "0x04f9");
//! ```

use crate::usb_types::DeviceDescriptor;
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor id of the primary scanner family
pub const BROTHER_VENDOR_ID: u16 = 0x04f9;
/// Vendor id of the variant family
pub const LENOVO_VENDOR_ID: u16 = 0x17ef;

/// Create a mock descriptor for the given ids
pub fn create_mock_descriptor(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor::from_ids(
        format!("Test Scanner {:04x}", product_id),
        vendor_id,
        product_id,
    )
}

/// Create a list of mock descriptors, alternating vendor families
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor_list;
///
/// let devices = create_mock_descriptor_list(4);
/// assert_eq!(devices.len(), 4);
/// ```
pub fn create_mock_descriptor_list(count: u16) -> Vec<DeviceDescriptor> {
    (0..count)
        .map(|i| {
            let vendor = if i % 2 == 0 {
                BROTHER_VENDOR_ID
            } else {
                LENOVO_VENDOR_ID
            };
            create_mock_descriptor(vendor, 0x6000 + i)
        })
        .collect()
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Negotiation reply as the device sends it: 3 opaque bytes, the fields,
/// one trailing byte
pub fn negotiation_reply(fields: &str) -> Vec<u8> {
    let mut reply = vec![0x00, 0x1d, 0x00];
    reply.extend_from_slice(fields.as_bytes());
    reply.push(0x00);
    reply
}
