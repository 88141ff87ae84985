use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Size of the little-endian header-block length prefix.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Line separator inside the header block.
pub const LINE_SEPARATOR: &str = "\r\n";

/// The mandatory first header: declared payload length in bytes.
pub const CONTENT_LENGTH: &str = "Content-length";

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Maximum accepted header block size: 64 KiB.
pub const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// An insertion-ordered string map with first-occurrence-wins semantics.
///
/// Keys and values are written to the wire verbatim: a key or value that
/// contains `:` or the line separator corrupts the frame (accepted
/// limitation, there is no escaping).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header. Returns false (and keeps the existing value) if the
    /// key is already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.entries.push((key, value.into()));
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// A decoded message: header map plus opaque payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Header map; always contains `Content-length`.
    pub headers: Headers,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// The declared payload length, if present and well-formed.
    ///
    /// For any frame produced by [`decode_frame`] this equals
    /// `payload.len()`.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get(CONTENT_LENGTH)?.trim().parse().ok()
    }
}

/// Encode a payload and headers into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────────┬──────────────────────────────┬──────────────────┐
/// │ headerLen (4B  │ header block (UTF-8 text,    │ payload          │
/// │ LE, signed)    │ headerLen bytes)             │ (N bytes)        │
/// └────────────────┴──────────────────────────────┴──────────────────┘
/// ```
///
/// The header block is `Content-length:<N>\r\n` followed by one
/// `<key>:<value>\r\n` line per caller-supplied header, in iteration order.
/// The length prefix counts only the header block.
pub fn encode_frame(payload: &[u8], headers: &Headers, dst: &mut BytesMut) -> Result<()> {
    let mut block = String::with_capacity(64);
    block.push_str(CONTENT_LENGTH);
    block.push(':');
    block.push_str(&payload.len().to_string());
    block.push_str(LINE_SEPARATOR);
    for (key, value) in headers.iter() {
        block.push_str(key);
        block.push(':');
        block.push_str(value);
        block.push_str(LINE_SEPARATOR);
    }

    if block.len() > i32::MAX as usize {
        return Err(FrameError::HeaderBlockTooLarge {
            size: block.len(),
            max: i32::MAX as usize,
        });
    }

    dst.reserve(LEN_PREFIX_SIZE + block.len() + payload.len());
    dst.put_i32_le(block.len() as i32);
    dst.put_slice(block.as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. A missing or
/// malformed `Content-length` is fatal: the stream position cannot be
/// recovered once the framing is in doubt.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < LEN_PREFIX_SIZE {
        return Ok(None); // Need more data
    }

    let header_len = i32::from_le_bytes(src[0..LEN_PREFIX_SIZE].try_into().unwrap());
    if header_len < 0 {
        return Err(FrameError::InvalidHeaderLength(header_len));
    }
    let header_len = header_len as usize;
    if header_len > MAX_HEADER_BLOCK {
        return Err(FrameError::HeaderBlockTooLarge {
            size: header_len,
            max: MAX_HEADER_BLOCK,
        });
    }

    if src.len() < LEN_PREFIX_SIZE + header_len {
        return Ok(None); // Need more data
    }

    // Invalid UTF-8 degrades to replacement characters rather than failing;
    // a garbled block then fails the Content-length requirement below.
    let block = String::from_utf8_lossy(&src[LEN_PREFIX_SIZE..LEN_PREFIX_SIZE + header_len]);
    let headers = parse_header_block(&block);

    let declared = headers
        .get(CONTENT_LENGTH)
        .ok_or(FrameError::MissingContentLength)?;
    let payload_len: usize =
        declared
            .trim()
            .parse()
            .map_err(|_| FrameError::InvalidContentLength {
                value: declared.to_string(),
            })?;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = LEN_PREFIX_SIZE + header_len + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(LEN_PREFIX_SIZE + header_len);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { headers, payload }))
}

/// Split a header block into a map.
///
/// Lines split on the first colon only; lines without a colon are dropped;
/// a key seen earlier wins over later duplicates.
fn parse_header_block(block: &str) -> Headers {
    let mut headers = Headers::new();
    for line in block.split(LINE_SEPARATOR) {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        headers.insert(key, value);
    }
    headers
}
