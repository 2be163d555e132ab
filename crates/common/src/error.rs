//! Common error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root cause classification of a failed scan
///
/// Carried across the worker channel so the enclosing service can map
/// failures to its own responses without inspecting engine internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanFailureKind {
    /// USB open/configure/claim/endpoint/control/bulk error
    Transport,
    /// Bounded polling ran out of iterations, or the stream deadline passed
    Timeout,
    /// Malformed device response
    Parse,
    /// No registered driver accepts the device
    NoMatchingDevice,
    /// Device descriptor ids could not be parsed
    InvalidDescriptor,
    /// One or more releases failed while disconnecting
    Teardown,
    /// Writing to the output sink failed
    Sink,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid USB id '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("Scan failed ({kind:?}): {message}")]
    Scan {
        kind: ScanFailureKind,
        message: String,
    },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
