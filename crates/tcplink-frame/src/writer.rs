use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Headers, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Each call emits the full wire image of one frame before returning, so a
/// caller holding exclusive access to the writer gets frame-atomic output.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    max_payload: usize,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with the default payload cap.
    pub fn new(inner: T) -> Self {
        Self::with_max_payload(inner, DEFAULT_MAX_PAYLOAD)
    }

    /// Create a new frame writer with an explicit payload cap.
    pub fn with_max_payload(inner: T, max_payload: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
        }
    }

    /// Encode and send one frame (blocking).
    ///
    /// A write timeout surfaces as an I/O error; only `Interrupted` writes
    /// are retried.
    pub fn send(&mut self, payload: &[u8], headers: &Headers) -> Result<()> {
        if payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        self.buf.clear();
        encode_frame(payload, headers, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<tcplink_transport::NetStream> {
    /// Create a frame writer for a [`NetStream`](tcplink_transport::NetStream)
    /// and apply the write timeout from settings.
    pub fn with_settings(
        inner: tcplink_transport::NetStream,
        settings: &tcplink_transport::TcpSettings,
    ) -> Result<Self> {
        inner
            .set_write_timeout(Some(settings.write_timeout))
            .map_err(crate::reader::transport_to_frame_error)?;
        Ok(Self::new(inner))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_frame, CONTENT_LENGTH, DEFAULT_MAX_PAYLOAD};

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let headers: Headers = [("Command", "ping")].into_iter().collect();

        writer.send(b"hello", &headers).unwrap();

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        let frame = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"hello");
        assert_eq!(frame.headers.get("Command"), Some("ping"));
        assert_eq!(frame.headers.get(CONTENT_LENGTH), Some("5"));
    }

    #[test]
    fn write_multiple_frames() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(b"one", &Headers::new()).unwrap();
        writer.send(b"two", &Headers::new()).unwrap();

        let mut wire = BytesMut::from(writer.into_inner().into_inner().as_slice());
        let f1 = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        let f2 = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(f1.payload.as_ref(), b"one");
        assert_eq!(f2.payload.as_ref(), b"two");
        assert!(wire.is_empty());
    }

    #[test]
    fn payload_too_large_rejected() {
        let mut writer = FrameWriter::with_max_payload(Cursor::new(Vec::<u8>::new()), 4);
        let err = writer.send(b"oversized", &Headers::new()).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(b"x", &Headers::new()).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = FrameWriter::new(writer_impl);
        writer.send(b"retry", &Headers::new()).unwrap();

        let inner = writer.into_inner();
        assert!(!inner.data.is_empty());
    }

    #[test]
    fn write_timeout_surfaces_as_error() {
        let mut writer = FrameWriter::new(WouldBlockWriter);
        let err = writer.send(b"x", &Headers::new()).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(b"x", &Headers::new()).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn written_bytes_decode_through_reader() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"z", &Headers::new()).unwrap();

        let wire = writer.into_inner().into_inner();
        let mut framed = crate::reader::FrameReader::new(Cursor::new(wire));
        let frame = framed.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"z");
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct WouldBlockWriter;

    impl Write for WouldBlockWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
