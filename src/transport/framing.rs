//! NETCONF message framing over a byte stream (RFC 6242).
//!
//! Hellos, and every message of a base 1.0 session, end with the `]]>]]>`
//! marker. Once both peers agree on base 1.1 the session switches to chunked
//! framing:
//!
//! ```text
//! \n#<chunk-size>\n<chunk-data> ... \n##\n
//! ```
//!
//! Inbound framing is detected per message, so a peer that switches right
//! after its hello is read correctly without coordinating with the writer.

use bytes::{Buf, BytesMut};

use crate::error::{NetconfError, Result};

/// End-of-message marker for 1.0 framing.
pub const EOM_MARKER: &[u8] = b"]]>]]>";

/// Largest chunk size RFC 6242 allows.
pub const MAX_CHUNK_SIZE: u64 = 4_294_967_295;

/// Outbound framing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// `]]>]]>` terminated messages
    #[default]
    EndOfMessage,
    /// Length-prefixed chunks
    Chunked,
}

impl Framing {
    /// Frame a complete message for the wire.
    pub fn encode(self, message: &str) -> Vec<u8> {
        match self {
            Framing::EndOfMessage => {
                let mut out = Vec::with_capacity(message.len() + EOM_MARKER.len());
                out.extend_from_slice(message.as_bytes());
                out.extend_from_slice(EOM_MARKER);
                out
            },
            Framing::Chunked => {
                let mut out = Vec::with_capacity(message.len() + 16);
                if !message.is_empty() {
                    out.extend_from_slice(format!("\n#{}\n", message.len()).as_bytes());
                    out.extend_from_slice(message.as_bytes());
                }
                out.extend_from_slice(b"\n##\n");
                out
            },
        }
    }
}

/// Incremental decoder for inbound messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Buffer to read into directly.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes that are not yet part of a complete message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete message, if the buffer holds one.
    pub fn decode(&mut self) -> Result<Option<String>> {
        // Whitespace between messages carries no data, but keep a lone '\n'
        // that may start a chunk header.
        while self.buf.len() > 1 && self.buf[0].is_ascii_whitespace() && self.buf[..2] != *b"\n#"
        {
            self.buf.advance(1);
        }

        if self.buf.len() < 2 {
            return Ok(None);
        }
        if self.buf.starts_with(b"\n#") {
            self.decode_chunked()
        } else {
            self.decode_eom()
        }
    }

    fn decode_eom(&mut self) -> Result<Option<String>> {
        let Some(end) = find(&self.buf, EOM_MARKER) else {
            return Ok(None);
        };
        let frame = self.buf.split_to(end);
        self.buf.advance(EOM_MARKER.len());
        into_message(frame.to_vec())
    }

    fn decode_chunked(&mut self) -> Result<Option<String>> {
        let mut pos = 0;
        let mut message = Vec::new();

        loop {
            let rest = &self.buf[pos..];
            if rest.len() < 3 {
                return Ok(None);
            }
            if !rest.starts_with(b"\n#") {
                return Err(NetconfError::Protocol(
                    "chunked framing: expected chunk header".to_string(),
                ));
            }
            if rest[2] == b'#' {
                if rest.len() < 4 {
                    return Ok(None);
                }
                if rest[3] != b'\n' {
                    return Err(NetconfError::Protocol(
                        "chunked framing: malformed end-of-chunks".to_string(),
                    ));
                }
                self.buf.advance(pos + 4);
                return into_message(message);
            }

            let Some(newline) = rest[2..].iter().position(|b| *b == b'\n') else {
                if rest.len() > 2 + 10 {
                    return Err(NetconfError::Protocol(
                        "chunked framing: chunk size too long".to_string(),
                    ));
                }
                return Ok(None);
            };
            let digits = &rest[2..2 + newline];
            let size = parse_chunk_size(digits)?;
            let start = 2 + newline + 1;
            if rest.len() < start + size {
                return Ok(None);
            }
            message.extend_from_slice(&rest[start..start + size]);
            pos += start + size;
        }
    }
}

fn parse_chunk_size(digits: &[u8]) -> Result<usize> {
    let invalid = || NetconfError::Protocol("chunked framing: invalid chunk size".to_string());
    if digits.is_empty() || digits.len() > 10 || digits[0] == b'0' {
        return Err(invalid());
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    let size: u64 = std::str::from_utf8(digits)
        .map_err(|_| invalid())?
        .parse()
        .map_err(|_| invalid())?;
    if size > MAX_CHUNK_SIZE {
        return Err(invalid());
    }
    usize::try_from(size).map_err(|_| invalid())
}

fn into_message(bytes: Vec<u8>) -> Result<Option<String>> {
    String::from_utf8(bytes)
        .map(|s| Some(s.trim().to_string()))
        .map_err(|_| NetconfError::Protocol("message is not valid UTF-8".to_string()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eom_decode_across_reads() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"<hello/>]]>");
        assert_eq!(decoder.decode().unwrap(), None);
        decoder.extend(b"]]>\n<rpc/>]]>]]>");
        assert_eq!(decoder.decode().unwrap().as_deref(), Some("<hello/>"));
        assert_eq!(decoder.decode().unwrap().as_deref(), Some("<rpc/>"));
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_chunked_multi_chunk() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"\n#4\n<rpc\n#17\n message-id=\"1\"/>\n##\n");
        assert_eq!(
            decoder.decode().unwrap().as_deref(),
            Some("<rpc message-id=\"1\"/>")
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_chunked_incomplete_waits() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"\n#12\n<rpc");
        assert_eq!(decoder.decode().unwrap(), None);
        decoder.extend(b"-reply/>\n#");
        assert_eq!(decoder.decode().unwrap(), None);
        decoder.extend(b"#\n");
        assert_eq!(decoder.decode().unwrap().as_deref(), Some("<rpc-reply/>"));
    }

    #[test]
    fn test_hello_then_chunked() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&Framing::EndOfMessage.encode("<hello/>"));
        decoder.extend(&Framing::Chunked.encode("<rpc/>"));
        assert_eq!(decoder.decode().unwrap().as_deref(), Some("<hello/>"));
        assert_eq!(decoder.decode().unwrap().as_deref(), Some("<rpc/>"));
    }

    #[test]
    fn test_invalid_chunk_sizes() {
        for bad in [&b"\n#0\nx\n##\n"[..], b"\n#01\nx\n##\n", b"\n#x\nx\n##\n", b"\n#4294967296\n"] {
            let mut decoder = FrameDecoder::new();
            decoder.extend(bad);
            assert!(decoder.decode().is_err(), "{:?}", String::from_utf8_lossy(bad));
        }
    }
}
