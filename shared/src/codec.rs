//! Newline codec for the device line protocol
//!
//! Every message on the wire is a line of text:
//! ```text
//! [ N bytes: text ][ optional '\r' ][ '\n' ]
//! ```
//!
//! Reads from the device may stop anywhere inside a line (read timeout), so
//! the decoder keeps partial data until its terminator arrives.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum line length (4 KiB) before an unterminated buffer is dropped
pub const MAX_LINE_LENGTH: usize = 4 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Line too long: {0} bytes without terminator (max: {MAX_LINE_LENGTH})")]
    LineTooLong(usize),

    #[error("Outgoing message contains a line terminator")]
    EmbeddedTerminator,
}

/// Encode a message into a newline-terminated byte buffer
pub fn encode(message: &str) -> Result<Bytes, CodecError> {
    if message.contains('\n') {
        return Err(CodecError::EmbeddedTerminator);
    }

    let mut buf = BytesMut::with_capacity(message.len() + 1);
    buf.put_slice(message.as_bytes());
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Try to decode one line from a buffer
///
/// Returns:
/// - `Ok(Some(line))` if a complete line was decoded (terminator stripped)
/// - `Ok(None)` if more data is needed
/// - `Err(LineTooLong)` if the buffer overflowed; the buffer is cleared
pub fn decode(buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
    let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_LINE_LENGTH {
            let len = buf.len();
            buf.clear();
            return Err(CodecError::LineTooLong(len));
        }
        return Ok(None);
    };

    let line = buf.split_to(pos + 1);
    let mut text = &line[..pos];
    if let Some(stripped) = text.strip_suffix(b"\r") {
        text = stripped;
    }

    // The device may emit stray bytes on connect; keep what is readable.
    Ok(Some(String::from_utf8_lossy(text).into_owned()))
}

/// Decoder state for streaming line decoding
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Partial line data being accumulated
    buffer: BytesMut,
}

impl LineDecoder {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Buffer that reads can append into directly
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Try to decode the next line from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete lines
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Drop any partial data (used when the link is reset)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_terminator() {
        let encoded = encode("T20474023012017").unwrap();
        assert_eq!(&encoded[..], b"T20474023012017\n");
    }

    #[test]
    fn test_encode_rejects_embedded_newline() {
        assert_eq!(encode("a\nb"), Err(CodecError::EmbeddedTerminator));
    }

    #[test]
    fn test_partial_decode() {
        let mut buf = BytesMut::from(&b"Flag:D001,Time:20:4"[..]);
        let result = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");

        // Buffer should be unchanged (data not consumed)
        assert_eq!(buf.len(), 19);
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut decoder = LineDecoder::new();

        decoder.extend(b"Flag:D001,Time:20:47");
        assert!(decoder.decode_next().unwrap().is_none());

        decoder.extend(b":40 23/01/2017,Value:22.70\r\n");
        let line = decoder.decode_next().unwrap().expect("should have a line");
        assert_eq!(line, "Flag:D001,Time:20:47:40 23/01/2017,Value:22.70");
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_multiple_lines() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"R001\nD001,ID:a\n\npartial");

        assert_eq!(decoder.decode_next().unwrap().as_deref(), Some("R001"));
        assert_eq!(decoder.decode_next().unwrap().as_deref(), Some("D001,ID:a"));
        assert_eq!(decoder.decode_next().unwrap().as_deref(), Some(""));
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffer_len(), "partial".len());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = LineDecoder::new();
        decoder.extend(&[0xff, b'R', b'0', b'0', b'1', b'\n']);
        let line = decoder.decode_next().unwrap().unwrap();
        assert!(line.contains("R001"));
    }

    #[test]
    fn test_line_too_long() {
        let mut decoder = LineDecoder::new();
        decoder.extend(&vec![b'x'; MAX_LINE_LENGTH + 1]);
        assert!(matches!(decoder.decode_next(), Err(CodecError::LineTooLong(_))));
        assert_eq!(decoder.buffer_len(), 0);
    }
}
