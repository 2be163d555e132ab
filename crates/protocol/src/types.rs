//! Scan option and negotiation type definitions
//!
//! These types describe what a caller asks the scanner for and what the
//! scanner grants in return. Field names serialize the way the HTTP API
//! exposes them (`DPI`, `Mode`, `Top`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scan colour mode, rendered verbatim into the `M=` command field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ScanMode {
    /// Black & white
    #[serde(rename = "TEXT")]
    Text,
    /// Gray with error diffusion
    #[serde(rename = "ERRDIF")]
    ErrorDiffusion,
    /// True gray (64 levels)
    #[serde(rename = "GRAY64")]
    Gray64,
    /// Colour gray, the mode the device is driven with by default
    #[default]
    #[serde(rename = "CGRAY")]
    CGray,
}

impl ScanMode {
    /// Wire representation used in command frames
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Text => "TEXT",
            ScanMode::ErrorDiffusion => "ERRDIF",
            ScanMode::Gray64 => "GRAY64",
            ScanMode::CGray => "CGRAY",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload compression requested in the `C=` command field
///
/// The payload is never decoded; this only selects what the device sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Compression {
    #[default]
    #[serde(rename = "JPEG")]
    Jpeg,
    #[serde(rename = "RLENGTH")]
    RunLength,
}

impl Compression {
    /// Wire representation used in command frames
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Jpeg => "JPEG",
            Compression::RunLength => "RLENGTH",
        }
    }

    /// Short file type tag for the produced payload
    pub fn file_type(&self) -> &'static str {
        match self {
            Compression::Jpeg => "jpeg",
            Compression::RunLength => "rle",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested scan parameters
///
/// Geometry is advisory: it is converted to pixels at the negotiated DPI and
/// clamped against the limits the device reports before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanOptions {
    /// Requested resolution (used for both axes)
    #[serde(rename = "DPI", alias = "dpi")]
    pub dpi: u16,
    /// Colour mode
    #[serde(alias = "mode")]
    pub mode: ScanMode,
    /// Payload compression
    #[serde(default, alias = "compression")]
    pub compression: Compression,
    /// Top edge of the window in millimeters
    #[serde(default, alias = "top")]
    pub top: f64,
    /// Left edge of the window in millimeters
    #[serde(default, alias = "left")]
    pub left: f64,
    /// Window width in millimeters
    #[serde(alias = "width")]
    pub width: f64,
    /// Window height in millimeters
    #[serde(alias = "height")]
    pub height: f64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            dpi: 400,
            mode: ScanMode::CGray,
            compression: Compression::Jpeg,
            top: 0.0,
            left: 0.0,
            width: 211.881,
            height: 355.567,
        }
    }
}

/// Settings granted by the device in reply to a negotiation command
///
/// Computed once per scan and never reused across scans or devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiationResult {
    /// Leading bytes of the response, meaning unknown
    pub prefix: [u8; 3],
    pub horizontal_dpi: u16,
    pub vertical_dpi: u16,
    /// Third field of the response, meaning unknown
    pub reserved: u16,
    pub scan_width: u16,
    pub output_width: u16,
    pub scan_height: u16,
    pub output_height: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_mode_wire_names() {
        assert_eq!(ScanMode::CGray.as_str(), "CGRAY");
        assert_eq!(ScanMode::Gray64.to_string(), "GRAY64");
        assert_eq!(ScanMode::default(), ScanMode::CGray);
    }

    #[test]
    fn test_compression_wire_names() {
        assert_eq!(Compression::Jpeg.as_str(), "JPEG");
        assert_eq!(Compression::RunLength.as_str(), "RLENGTH");
        assert_eq!(Compression::RunLength.file_type(), "rle");
    }

    #[test]
    fn test_default_scan_options() {
        let opts = ScanOptions::default();
        assert_eq!(opts.dpi, 400);
        assert_eq!(opts.mode, ScanMode::CGray);
        assert_eq!(opts.compression, Compression::Jpeg);
        assert_eq!(opts.width, 211.881);
    }
}
