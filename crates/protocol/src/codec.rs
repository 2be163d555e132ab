//! Command frame construction and response parsing
//!
//! Every command sent to the scanner is a small ASCII frame:
//!
//! ```text
//! ESC <letter> LF [KEY=value[,value...] LF]... 0x80
//! ```
//!
//! Responses to the capability query and the feeder configuration are not
//! interpreted. The negotiation response carries three opaque bytes followed
//! by seven comma-separated decimal fields and one trailing byte.

use crate::error::{ProtocolError, Result};
use crate::geometry::ScanWindow;
use crate::types::{Compression, NegotiationResult, ScanMode};
use bytes::{BufMut, BytesMut};

/// Escape byte opening every command
pub const ESC: u8 = 0x1b;
/// Field separator
pub const LF: u8 = 0x0a;
/// Command terminator, also the end-of-stream sentinel
pub const TERMINATOR: u8 = 0x80;

/// Expected response length of the capability query
pub const CAPABILITIES_RESPONSE_LEN: usize = 281;
/// Expected response length of resolution negotiation
pub const NEGOTIATION_RESPONSE_LEN: usize = 281;
/// Expected response length of feeder configuration
pub const FEEDER_RESPONSE_LEN: usize = 64;

/// Control request issued before the capability query and before negotiation
pub const CONTROL_REQUEST_PRIME: u8 = 1;
/// Control request issued between the two primes and after the image stream
pub const CONTROL_REQUEST_FINALIZE: u8 = 2;
/// `wValue` of every control request
pub const CONTROL_VALUE: u16 = 0x0002;
/// `wIndex` of every control request
pub const CONTROL_INDEX: u16 = 0;
/// `wLength` of every control request; the reply is not interpreted
pub const CONTROL_RESPONSE_LEN: usize = 5;

/// Shortest negotiation response that can be parsed
pub const MIN_NEGOTIATION_LEN: usize = 10;

const NEGOTIATION_PREFIX_LEN: usize = 3;
const NEGOTIATION_FIELDS: usize = 7;

/// Brightness and contrast sent with every scan
pub const DEFAULT_BRIGHTNESS: u16 = 50;
pub const DEFAULT_CONTRAST: u16 = 50;

/// Builder for an `ESC <letter> LF ... 0x80` command
///
/// # Example
/// ```
/// use protocol::CommandFrame;
///
/// let frame = CommandFrame::new(b'D').line("ADF").finish();
/// assert_eq!(frame, vec![0x1b, b'D', 0x0a, b'A', b'D', b'F', 0x0a, 0x80]);
/// ```
#[derive(Debug, Clone)]
pub struct CommandFrame {
    buf: BytesMut,
}

impl CommandFrame {
    /// Start a frame for the command letter
    pub fn new(letter: u8) -> Self {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_u8(ESC);
        buf.put_u8(letter);
        buf.put_u8(LF);
        Self { buf }
    }

    /// Append a bare line followed by LF
    pub fn line(mut self, text: &str) -> Self {
        self.buf.put_slice(text.as_bytes());
        self.buf.put_u8(LF);
        self
    }

    /// Append a `KEY=value` line
    pub fn field(self, key: &str, value: impl std::fmt::Display) -> Self {
        self.line(&format!("{}={}", key, value))
    }

    /// Terminate the frame
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.put_u8(TERMINATOR);
        self.buf.to_vec()
    }
}

/// `ESC Q LF 0x80`
pub fn capabilities_request() -> Vec<u8> {
    CommandFrame::new(b'Q').finish()
}

/// `ESC I LF R=<dpi>,<dpi> LF M=<mode> LF 0x80`
pub fn negotiation_request(dpi: u16, mode: ScanMode) -> Vec<u8> {
    CommandFrame::new(b'I')
        .field("R", format_args!("{},{}", dpi, dpi))
        .field("M", mode)
        .finish()
}

/// `ESC D LF ADF LF 0x80`
pub fn feeder_request() -> Vec<u8> {
    CommandFrame::new(b'D').line("ADF").finish()
}

/// Parameters of the start-scan command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRequest {
    pub horizontal_dpi: u16,
    pub vertical_dpi: u16,
    pub mode: ScanMode,
    pub compression: Compression,
    pub brightness: u16,
    pub contrast: u16,
    pub window: ScanWindow,
}

impl ScanRequest {
    /// Encode as an `ESC X` frame
    ///
    /// The device answers with image data on the bulk-in endpoint; the frame
    /// itself has no direct response.
    pub fn to_bytes(&self) -> Vec<u8> {
        let w = &self.window;
        CommandFrame::new(b'X')
            .field(
                "R",
                format_args!("{},{}", self.horizontal_dpi, self.vertical_dpi),
            )
            .field("M", self.mode)
            .field("C", self.compression)
            .field("J", "MID")
            .field("B", self.brightness)
            .field("N", self.contrast)
            .field(
                "A",
                format_args!("{},{},{},{}", w.left, w.top, w.width, w.height),
            )
            .field("S", "NORMAL_SCAN")
            .field("P", 0)
            .field("G", 0)
            .field("L", 0)
            .finish()
    }
}

/// Parse the device reply to a negotiation request
///
/// Layout: 3 opaque bytes, then `h,v,reserved,scan_w,out_w,scan_h,out_h`,
/// then one trailing byte that is ignored. Fields beyond the seventh are
/// ignored as well.
///
/// # Example
/// ```
/// use protocol::parse_negotiation;
///
/// let resp = b"\x00\x1d\x00300,300,2,2480,291,3437,300\x00";
/// let neg = parse_negotiation(resp).unwrap();
/// assert_eq!(neg.horizontal_dpi, 300);
/// assert_eq!(neg.scan_height, 3437);
/// ```
pub fn parse_negotiation(data: &[u8]) -> Result<NegotiationResult> {
    if data.len() < MIN_NEGOTIATION_LEN {
        return Err(ProtocolError::TooShort {
            len: data.len(),
            min: MIN_NEGOTIATION_LEN,
        });
    }

    let body = &data[NEGOTIATION_PREFIX_LEN..data.len() - 1];
    let fields: Vec<&[u8]> = body.split(|b| *b == b',').collect();
    if fields.len() < NEGOTIATION_FIELDS {
        return Err(ProtocolError::MissingField {
            expected: NEGOTIATION_FIELDS,
            actual: fields.len(),
        });
    }

    let mut values = [0u16; NEGOTIATION_FIELDS];
    for (index, (slot, raw)) in values.iter_mut().zip(&fields).enumerate() {
        *slot = parse_decimal(raw).ok_or_else(|| ProtocolError::InvalidField {
            index,
            value: String::from_utf8_lossy(raw).into_owned(),
        })?;
    }

    Ok(NegotiationResult {
        prefix: [data[0], data[1], data[2]],
        horizontal_dpi: values[0],
        vertical_dpi: values[1],
        reserved: values[2],
        scan_width: values[3],
        output_width: values[4],
        scan_height: values[5],
        output_height: values[6],
    })
}

fn parse_decimal(raw: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
