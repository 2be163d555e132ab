//! Image stream chunk framing
//!
//! After the start-scan command the device streams image data as a series of
//! variable-length bulk reads. A read consisting of the single byte `0x80`
//! ends the stream. Some reads open with a 12-byte batch header, recognised by
//! the magic prefix `64 07 00`; its contents are not understood and it is
//! dropped before the payload is forwarded.

use crate::codec::TERMINATOR;

/// Magic prefix of the batch header
pub const BATCH_HEADER_MAGIC: [u8; 3] = [0x64, 0x07, 0x00];
/// Length of the batch header
pub const BATCH_HEADER_LEN: usize = 12;

/// Classification of a single bulk read from the image stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChunk<'a> {
    /// Nothing was read; not an error and not the end
    Empty,
    /// The end-of-stream sentinel
    End,
    /// Payload to forward verbatim
    Data(&'a [u8]),
}

impl<'a> StreamChunk<'a> {
    /// Classify the bytes returned by one read
    ///
    /// # Example
    /// ```
    /// use protocol::StreamChunk;
    ///
    /// assert_eq!(StreamChunk::classify(&[]), StreamChunk::Empty);
    /// assert_eq!(StreamChunk::classify(&[0x80]), StreamChunk::End);
    /// assert_eq!(StreamChunk::classify(&[0xff, 0xd8]), StreamChunk::Data(&[0xff, 0xd8]));
    /// ```
    pub fn classify(read: &'a [u8]) -> Self {
        match read {
            [] => StreamChunk::Empty,
            [TERMINATOR] => StreamChunk::End,
            _ => StreamChunk::Data(strip_batch_header(read)),
        }
    }
}

/// Drop a leading batch header, if present
pub fn strip_batch_header(read: &[u8]) -> &[u8] {
    if read.len() > BATCH_HEADER_LEN && read.starts_with(&BATCH_HEADER_MAGIC) {
        &read[BATCH_HEADER_LEN..]
    } else {
        read
    }
}
