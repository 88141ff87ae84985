use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;

/// A connected TCP stream — implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// Clones created with [`NetStream::try_clone`] share the underlying socket
/// and its liveness flag, so a read half and a write half of the same
/// connection always agree on whether the connection is open.
pub struct NetStream {
    inner: TcpStream,
    open: Arc<AtomicBool>,
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl NetStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: stream,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// The clone shares the liveness flag: shutting down either handle marks
    /// both closed.
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self {
            inner: cloned,
            open: Arc::clone(&self.open),
        })
    }

    /// The remote endpoint of this connection.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr().map_err(Into::into)
    }

    /// The remote `ip:port` string used as a peer's registry identity.
    pub fn peer_identity(&self) -> Result<String> {
        Ok(self.peer_addr()?.to_string())
    }

    /// Whether this connection is still considered open.
    ///
    /// This reports the last known state, not a live probe: it turns false
    /// once either handle has been shut down. Use [`NetStream::probe_connected`]
    /// to interrogate the socket itself.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Shut down both directions of the connection and mark it closed.
    ///
    /// Unblocks a read in progress on any clone of this stream. Safe to call
    /// more than once.
    pub fn shutdown(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!("shutting down stream");
            let _ = self.inner.shutdown(Shutdown::Both);
        }
    }

    /// Probe whether the remote end is still there.
    ///
    /// Performs a non-blocking one-byte peek: a peek of zero bytes means the
    /// peer has closed; `WouldBlock` means the connection is idle but alive.
    /// The socket timeouts can delay the normal failure path for minutes, so
    /// this gives callers an immediate answer.
    pub fn probe_connected(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.inner.set_nonblocking(true).is_err() {
            return false;
        }
        let mut buf = [0u8; 1];
        let alive = match self.inner.peek(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        };
        let _ = self.inner.set_nonblocking(false);
        alive
    }
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetStream")
            .field("peer", &self.inner.peer_addr().ok())
            .field("open", &self.is_open())
            .finish()
    }
}
