use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with the default payload cap.
    pub fn new(inner: T) -> Self {
        Self::with_max_payload(inner, DEFAULT_MAX_PAYLOAD)
    }

    /// Create a new frame reader with an explicit payload cap.
    pub fn with_max_payload(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the stream ends,
    /// whether between frames or mid-frame. An under-read is connection
    /// loss, never a short frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.max_payload)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameReader<tcplink_transport::NetStream> {
    /// Create a frame reader for a [`NetStream`](tcplink_transport::NetStream)
    /// and apply the read timeout from settings.
    pub fn with_settings(
        inner: tcplink_transport::NetStream,
        settings: &tcplink_transport::TcpSettings,
    ) -> Result<Self> {
        inner
            .set_read_timeout(Some(settings.read_timeout))
            .map_err(transport_to_frame_error)?;
        Ok(Self::new(inner))
    }
}

pub(crate) fn transport_to_frame_error(err: tcplink_transport::TransportError) -> FrameError {
    match err {
        tcplink_transport::TransportError::Io(io)
        | tcplink_transport::TransportError::Accept(io) => FrameError::Io(io),
        tcplink_transport::TransportError::Bind { source, .. }
        | tcplink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
