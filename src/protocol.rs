//! Wire framing for chat messages.
//!
//! Every message on the wire is a fixed-width ASCII decimal header giving the
//! body length, followed by exactly that many body bytes:
//!
//! ```text
//! Frame:   <4-byte length><body>
//!
//! Example:
//!   "   2hi"
//!   "0005hello"
//! ```
//!
//! There is no delimiter and no resynchronization: a bad header means the
//! stream can no longer be trusted and the connection must be dropped.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Width of the length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest body a frame may carry.
pub const MAX_BODY_LEN: usize = 512;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Header was not a padded unsigned decimal of the right width.
    InvalidHeader,
    /// Body length exceeds `MAX_BODY_LEN`.
    BodyTooLong(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidHeader => write!(f, "invalid frame header"),
            FrameError::BodyTooLong(len) => {
                write!(f, "frame body of {len} bytes exceeds {MAX_BODY_LEN}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// A complete encoded frame (header followed by body).
///
/// Backed by `Bytes`, so cloning for fan-out shares the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Encode `body` into a frame.
    ///
    /// Fails if the body is longer than `MAX_BODY_LEN`.
    pub fn encode(body: &str) -> Result<Self, FrameError> {
        let len = body.len();
        if len > MAX_BODY_LEN {
            return Err(FrameError::BodyTooLong(len));
        }

        let mut data = BytesMut::with_capacity(HEADER_LEN + len);
        data.put_slice(format!("{len:>width$}", width = HEADER_LEN).as_bytes());
        data.put_slice(body.as_bytes());

        Ok(Frame {
            data: data.freeze(),
        })
    }

    /// Encode server-composed text, cutting it down to fit if needed.
    ///
    /// The cut lands on a UTF-8 character boundary so the body stays valid text.
    pub fn clamped(text: &str) -> Self {
        let mut end = text.len().min(MAX_BODY_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        match Frame::encode(&text[..end]) {
            Ok(frame) => frame,
            Err(_) => unreachable!(),
        }
    }

    /// The fixed-width header bytes.
    #[cfg(test)]
    pub fn header(&self) -> &[u8] {
        &self.data[..HEADER_LEN]
    }

    /// The body bytes.
    #[cfg(test)]
    pub fn body(&self) -> &[u8] {
        &self.data[HEADER_LEN..]
    }

    pub fn body_len(&self) -> usize {
        self.data.len() - HEADER_LEN
    }

    /// The full wire image, ready to be written to a socket.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Parse a frame header into the body length that follows it.
///
/// Accepts leading zeros and space padding on either side of the digits.
pub fn decode_header(header: &[u8]) -> Result<usize, FrameError> {
    if header.len() != HEADER_LEN {
        return Err(FrameError::InvalidHeader);
    }

    let digits = header.trim_ascii();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::InvalidHeader);
    }

    // At most HEADER_LEN digits, so this cannot overflow.
    let len = digits
        .iter()
        .fold(0usize, |acc, &d| acc * 10 + usize::from(d - b'0'));

    if len > MAX_BODY_LEN {
        return Err(FrameError::BodyTooLong(len));
    }

    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_encode_pads_header() {
        let frame = assert_ok!(Frame::encode("hi"));
        assert_eq!(frame.as_bytes(), b"   2hi");
        assert_eq!(frame.header(), b"   2");
        assert_eq!(frame.body(), b"hi");
        assert_eq!(frame.body_len(), 2);
    }

    #[test]
    fn test_encode_empty_body() {
        let frame = assert_ok!(Frame::encode(""));
        assert_eq!(frame.as_bytes(), b"   0");
        assert_eq!(assert_ok!(decode_header(frame.header())), 0);
    }

    #[test]
    fn test_encode_max_body() {
        let body = "x".repeat(MAX_BODY_LEN);
        let frame = assert_ok!(Frame::encode(&body));
        assert_eq!(frame.header(), b" 512");
        assert_eq!(assert_ok!(decode_header(frame.header())), MAX_BODY_LEN);
    }

    #[test]
    fn test_encode_rejects_long_body() {
        let body = "x".repeat(MAX_BODY_LEN + 1);
        assert_eq!(
            Frame::encode(&body),
            Err(FrameError::BodyTooLong(MAX_BODY_LEN + 1))
        );
    }

    #[test]
    fn test_header_matches_body_length() {
        for body in ["a", "hello world", "héllo", "user 127.0.0.1 5555 joined the chat"] {
            let frame = assert_ok!(Frame::encode(body));
            assert_eq!(assert_ok!(decode_header(frame.header())), body.len());
        }
    }

    #[test]
    fn test_clamped_cuts_at_char_boundary() {
        // 511 ASCII bytes then a 2-byte character straddling the limit
        let text = format!("{}é", "a".repeat(MAX_BODY_LEN - 1));
        let frame = Frame::clamped(&text);
        assert_eq!(frame.body_len(), MAX_BODY_LEN - 1);
        assert!(std::str::from_utf8(frame.body()).is_ok());
    }

    #[test]
    fn test_clamped_long_text_encodes_prefix() {
        let text = "y".repeat(MAX_BODY_LEN + 40);
        let frame = Frame::clamped(&text);
        assert_eq!(frame, assert_ok!(Frame::encode(&text[..MAX_BODY_LEN])));
        assert_eq!(assert_ok!(decode_header(frame.header())), MAX_BODY_LEN);
    }

    #[test]
    fn test_clamped_short_text_is_unchanged() {
        assert_eq!(Frame::clamped("hi"), assert_ok!(Frame::encode("hi")));
    }

    #[test]
    fn test_decode_header_padding() {
        assert_eq!(decode_header(b"0042"), Ok(42));
        assert_eq!(decode_header(b"  42"), Ok(42));
        assert_eq!(decode_header(b"42  "), Ok(42));
        assert_eq!(decode_header(b"0000"), Ok(0));
    }

    #[test]
    fn test_decode_header_invalid() {
        assert_err!(decode_header(b"abcd"));
        assert_err!(decode_header(b"    "));
        assert_err!(decode_header(b"1 2 "));
        assert_err!(decode_header(b"-001"));
        assert_err!(decode_header(b"123"));
        assert_err!(decode_header(b"00012"));
    }

    #[test]
    fn test_decode_header_too_long() {
        assert_eq!(decode_header(b"0513"), Err(FrameError::BodyTooLong(513)));
        assert_eq!(decode_header(b"9999"), Err(FrameError::BodyTooLong(9999)));
    }
}
