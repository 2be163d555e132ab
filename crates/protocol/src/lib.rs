//! Wire protocol for USB document scanners
//!
//! This crate implements the hardware-free half of the scanner protocol:
//! command frame builders, the negotiation response parser, image stream
//! chunk framing, and the millimeter to pixel geometry. Everything here
//! operates on byte buffers and is independently testable against captured
//! traffic.
//!
//! # Example
//!
//! ```
//! use protocol::{ScanMode, negotiation_request, parse_negotiation};
//!
//! // Ask for 300 DPI
//! let cmd = negotiation_request(300, ScanMode::CGray);
//! assert_eq!(&cmd[..3], b"\x1bI\n");
//!
//! // Device reply
//! let reply = b"\x00\x1d\x00300,300,2,2480,291,3437,300\x00";
//! let neg = parse_negotiation(reply).unwrap();
//! assert_eq!(neg.scan_width, 2480);
//! ```
//!
//! # Image stream
//!
//! ```
//! use protocol::StreamChunk;
//!
//! match StreamChunk::classify(&[0x80]) {
//!     StreamChunk::End => {}
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod codec;
pub mod error;
pub mod geometry;
pub mod stream;
pub mod types;

pub use codec::{
    CAPABILITIES_RESPONSE_LEN, CONTROL_INDEX, CONTROL_REQUEST_FINALIZE, CONTROL_REQUEST_PRIME,
    CONTROL_RESPONSE_LEN, CONTROL_VALUE, CommandFrame, DEFAULT_BRIGHTNESS, DEFAULT_CONTRAST, ESC,
    FEEDER_RESPONSE_LEN, LF, MIN_NEGOTIATION_LEN, NEGOTIATION_RESPONSE_LEN, ScanRequest,
    TERMINATOR, capabilities_request, feeder_request, negotiation_request, parse_negotiation,
};
pub use error::{ProtocolError, Result};
pub use geometry::{MM_PER_INCH, ScanWindow, mm_to_pixels};
pub use stream::{BATCH_HEADER_LEN, BATCH_HEADER_MAGIC, StreamChunk, strip_batch_header};
pub use types::{Compression, NegotiationResult, ScanMode, ScanOptions};
