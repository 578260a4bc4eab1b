//! Newline-delimited codec for the serial link
//!
//! Every message, control token or application payload, is framed as:
//! ```text
//! [ N bytes: ASCII text ][ '\n' ]
//! ```
//!
//! A `\r` directly before the terminator is dropped on decode so devices that
//! emit CRLF produce the same lines.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Line terminator on the wire
pub const LINE_TERMINATOR: u8 = b'\n';

/// Maximum unterminated line length kept in the buffer
pub const MAX_LINE_LENGTH: usize = 4096;

/// Errors that can occur during decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Line too long: {0} bytes without terminator (max: {MAX_LINE_LENGTH})")]
    LineTooLong(usize),
}

/// Encode a line, appending the terminator
pub fn encode(line: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(line.len() + 1);
    encode_into(line, &mut buf);
    buf.freeze()
}

/// Encode a line directly into a provided buffer
pub fn encode_into(line: &str, buf: &mut BytesMut) {
    buf.reserve(line.len() + 1);
    buf.put_slice(line.as_bytes());
    buf.put_u8(LINE_TERMINATOR);
}

/// Try to decode one line from a buffer
///
/// Returns:
/// - `Ok(Some(line))` if a complete line was decoded (terminator stripped)
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the buffered data exceeds [`MAX_LINE_LENGTH`] without a terminator
pub fn decode(buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
    let Some(pos) = buf.iter().position(|&b| b == LINE_TERMINATOR) else {
        if buf.len() > MAX_LINE_LENGTH {
            return Err(CodecError::LineTooLong(buf.len()));
        }
        return Ok(None);
    };

    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(pos - 1);
    }

    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Streaming line decoder
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Bytes received since the last complete line
    buffer: BytesMut,
    /// Dropping the tail of an oversized line up to its terminator
    discarding: bool,
}

impl LineDecoder {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH),
            discarding: false,
        }
    }

    /// Add received bytes to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete lines.
    /// An oversized line is reported once, then skipped up to and including
    /// its terminator.
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        if self.discarding {
            match self.buffer.iter().position(|&b| b == LINE_TERMINATOR) {
                Some(pos) => {
                    let _ = self.buffer.split_to(pos + 1);
                    self.discarding = false;
                }
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
            }
        }

        let result = decode(&mut self.buffer);
        if result.is_err() {
            self.buffer.clear();
            self.discarding = true;
        }
        result
    }

    /// Drop any partial line, e.g. after the transport was reopened
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
