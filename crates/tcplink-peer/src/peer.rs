use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, error, warn};

use tcplink_frame::{Frame, FrameError, FrameReader, FrameWriter, Headers};
use tcplink_transport::{NetStream, TcpSettings};

use crate::error::{PeerError, Result};
use crate::events::DisconnectReason;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// Atomic holder for a [`ConnectionState`].
///
/// The `Connected -> Disconnected` edge goes through a compare-and-swap so
/// the disconnect notification fires exactly once per connection, no matter
/// how many paths (receive loop, failed send, explicit close) race to it.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Returns true if this call performed the `Connected -> Disconnected`
    /// transition.
    pub(crate) fn disconnect(&self) -> bool {
        self.0
            .compare_exchange(
                ConnectionState::Connected as u8,
                ConnectionState::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Owner interface for a [`PeerConnection`].
///
/// Implemented by the client and server wiring; both callbacks are
/// fire-and-forget. `disconnected` fires at most once per connection.
pub trait ConnectionObserver: Send + Sync {
    /// A complete frame was decoded from the peer.
    fn frame_received(&self, identity: &str, frame: Frame);

    /// The connection transitioned to `Disconnected`.
    fn disconnected(&self, identity: &str, reason: DisconnectReason);
}

/// One live transport connection: serialized send path plus a dedicated
/// receive thread.
///
/// Construction and start are separate steps so an owner can register the
/// connection (e.g. insert it into a registry) before any notification can
/// fire.
pub struct PeerConnection {
    identity: String,
    writer: Mutex<FrameWriter<NetStream>>,
    reader: Mutex<Option<FrameReader<NetStream>>>,
    control: NetStream,
    state: StateCell,
    cancelled: AtomicBool,
    observer: OnceLock<Arc<dyn ConnectionObserver>>,
}

impl PeerConnection {
    /// Wrap a connected stream. Applies the socket timeouts from `settings`.
    pub fn new(
        stream: NetStream,
        identity: impl Into<String>,
        settings: &TcpSettings,
    ) -> Result<Arc<Self>> {
        let reader = FrameReader::with_settings(stream.try_clone()?, settings)?;
        let writer = FrameWriter::with_settings(stream.try_clone()?, settings)?;

        Ok(Arc::new(Self {
            identity: identity.into(),
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            control: stream,
            state: StateCell::new(ConnectionState::Disconnected),
            cancelled: AtomicBool::new(false),
            observer: OnceLock::new(),
        }))
    }

    /// Mark the connection live and spawn its receive loop.
    ///
    /// A second call is a no-op.
    pub fn start(self: &Arc<Self>, observer: Arc<dyn ConnectionObserver>) -> Result<()> {
        if self.observer.set(observer).is_err() {
            return Ok(());
        }
        let Some(reader) = lock_unpoisoned(&self.reader).take() else {
            return Ok(());
        };

        self.state.store(ConnectionState::Connected);

        let conn = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("tcplink-recv-{}", self.identity))
            .spawn(move || conn.receive_loop(reader))
            .map_err(tcplink_transport::TransportError::Io)?;
        Ok(())
    }

    /// The remote `ip:port` string this connection is known by.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state.load() == ConnectionState::Connected
    }

    /// Interrogate the socket itself instead of the last known state.
    pub fn probe_connected(&self) -> bool {
        self.control.probe_connected()
    }

    /// Encode and send one frame to the peer.
    ///
    /// At most one send is in flight per connection at any time; concurrent
    /// callers serialize on the internal lock in unspecified order, and the
    /// bytes of two frames never interleave on the wire.
    ///
    /// Errors are returned only for precondition violations (empty payload,
    /// not connected). A write failure on a live connection is absorbed: it
    /// is logged, the connection transitions to `Disconnected`, and the
    /// owner is notified through its observer.
    pub fn send(&self, payload: &[u8], headers: Option<&Headers>) -> Result<()> {
        if payload.is_empty() {
            return Err(PeerError::EmptyPayload);
        }
        if self.state.load() != ConnectionState::Connected {
            return Err(PeerError::NotConnected(self.identity.clone()));
        }

        let default_headers = Headers::new();
        let headers = headers.unwrap_or(&default_headers);

        let result = {
            let mut writer = lock_unpoisoned(&self.writer);
            writer.send(payload, headers)
        };

        if let Err(err) = result {
            warn!(identity = %self.identity, error = %err, "send failed, dropping connection");
            self.close(DisconnectReason::Timeout);
        }
        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Performs the disconnect transition (notifying the owner if this call
    /// won it), then shuts the socket down, which also unblocks an in-flight
    /// read on the receive thread. Safe to call more than once.
    pub fn close(&self, reason: DisconnectReason) {
        self.cancelled.store(true, Ordering::Release);
        self.transition_disconnected(reason);
        self.control.shutdown();
    }

    fn transition_disconnected(&self, reason: DisconnectReason) {
        if self.state.disconnect() {
            debug!(identity = %self.identity, %reason, "disconnected");
            if let Some(observer) = self.observer.get() {
                observer.disconnected(&self.identity, reason);
            }
        }
    }

    fn receive_loop(self: Arc<Self>, mut reader: FrameReader<NetStream>) {
        debug!(identity = %self.identity, "receive loop started");
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                debug!(identity = %self.identity, "receive loop cancelled");
                break;
            }
            if !self.control.is_open() {
                self.transition_disconnected(DisconnectReason::Timeout);
                break;
            }

            match reader.read_frame() {
                Ok(frame) => {
                    if let Some(observer) = self.observer.get() {
                        observer.frame_received(&self.identity, frame);
                    }
                }
                Err(err) if err.is_protocol_violation() => {
                    error!(identity = %self.identity, error = %err, "framing violation, dropping connection");
                    self.transition_disconnected(DisconnectReason::Protocol);
                    break;
                }
                Err(FrameError::ConnectionClosed) => {
                    debug!(identity = %self.identity, "peer closed the connection");
                    self.transition_disconnected(DisconnectReason::Timeout);
                    break;
                }
                Err(err) => {
                    warn!(identity = %self.identity, error = %err, "receive failed");
                    self.transition_disconnected(DisconnectReason::Timeout);
                    break;
                }
            }
        }
        debug!(identity = %self.identity, "receive loop ended");
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("identity", &self.identity)
            .field("state", &self.state.load())
            .finish()
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
