//! Wire protocol constants and key-enumeration framing.
//!
//! `GET /{domain}` streams the key set as newline-terminated JSON arrays of
//! at most [`CHUNK_SIZE`] keys each:
//!
//! ```text
//! ["abc123","xyz",...]\n
//! ["k42"]\n
//! ```
//!
//! Errors travel in the [`ERROR_HEADER`] response header; see
//! [`ErrorKind::header_value`](crate::ErrorKind::header_value).

use crate::error::{Error, Result};
use bytes::Bytes;

/// Response header naming the error kind.
pub const ERROR_HEADER: &str = "x-err";

/// Maximum keys per enumeration frame.
pub const CHUNK_SIZE: usize = 100;

/// Content type of value bodies.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Encodes one frame: a JSON array of keys followed by a newline.
///
/// # Errors
///
/// Returns [`Error::Internal`] if serialization fails.
pub fn encode_frame(keys: &[String]) -> Result<Bytes> {
    let mut buf = serde_json::to_vec(keys)
        .map_err(|e| Error::Internal(format!("failed to encode key frame: {e}")))?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

/// Incremental decoder for enumeration frames.
///
/// Feed it body chunks as they arrive; frames may span chunk boundaries.
#[derive(Debug, Default)]
pub struct KeyFrameDecoder {
    buf: Vec<u8>,
}

impl KeyFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the keys of every frame it completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Operational`] for a line that is not a JSON array of
    /// strings.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(chunk);
        let Some(last_newline) = self.buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };

        let rest = self.buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buf, rest);

        let mut keys = Vec::new();
        for line in complete.split(|&b| b == b'\n') {
            keys.extend(decode_line(line)?);
        }
        Ok(keys)
    }

    /// Decodes a trailing frame that lacks its newline.
    ///
    /// # Errors
    ///
    /// Same as [`push`](Self::push).
    pub fn finish(self) -> Result<Vec<String>> {
        decode_line(&self.buf)
    }
}

fn decode_line(line: &[u8]) -> Result<Vec<String>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(line)
        .map_err(|e| Error::operational(format!("malformed key frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(&keys(&["a", "b.c"])).unwrap();
        assert_eq!(&frame[..], b"[\"a\",\"b.c\"]\n");
    }

    #[test]
    fn test_decode_across_chunk_boundaries() {
        let mut body = encode_frame(&keys(&["abc", "def"])).unwrap().to_vec();
        body.extend_from_slice(&encode_frame(&keys(&["ghi"])).unwrap());

        let mut decoder = KeyFrameDecoder::new();
        let mut seen = Vec::new();
        for chunk in body.chunks(3) {
            seen.extend(decoder.push(chunk).unwrap());
        }
        seen.extend(decoder.finish().unwrap());

        assert_eq!(seen, keys(&["abc", "def", "ghi"]));
    }

    #[test]
    fn test_trailing_frame_without_newline() {
        let mut decoder = KeyFrameDecoder::new();
        assert!(decoder.push(b"[\"x\",\"y\"]").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap(), keys(&["x", "y"]));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut decoder = KeyFrameDecoder::new();
        assert_eq!(decoder.push(b"\n[\"a\"]\n\n").unwrap(), keys(&["a"]));
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frame_is_operational() {
        let mut decoder = KeyFrameDecoder::new();
        let err = decoder.push(b"{\"not\": \"an array\"}\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operational);
    }
}
