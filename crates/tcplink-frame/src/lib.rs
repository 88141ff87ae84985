//! Length-prefixed header/payload message framing.
//!
//! This is the core value-add layer of tcplink. Every message is framed with:
//! - A 4-byte little-endian signed length of the header block
//! - A UTF-8 header block (`\r\n`-separated lines, `Content-length` first)
//! - The payload, whose length the `Content-length` header declares
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, Headers, CONTENT_LENGTH, DEFAULT_MAX_PAYLOAD,
    LEN_PREFIX_SIZE, LINE_SEPARATOR, MAX_HEADER_BLOCK,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
