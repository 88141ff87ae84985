use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use tcplink_frame::{Frame, Headers};
use tcplink_transport::{NetStream, TcpSettings, TcpSocket};

use crate::error::{PeerError, Result};
use crate::events::{DisconnectReason, NullEvents, ServerEvents};
use crate::peer::{lock_unpoisoned, ConnectionObserver, PeerConnection};
use crate::registry::PeerRegistry;

/// Final frame sent to every peer during server teardown, best effort.
const FAREWELL: &[u8] = b"server shutting down";

/// A listening server: accepts connections, registers each peer under its
/// remote `ip:port` identity, and exchanges frames with any registered peer.
///
/// Peers leave the registry through [`TcpServer::disconnect_peer`] or
/// through their own failure path; either way the configured
/// [`ServerEvents`] sink hears about it exactly once.
pub struct TcpServer {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    socket: TcpSocket,
    settings: TcpSettings,
    events: Mutex<Arc<dyn ServerEvents>>,
    registry: PeerRegistry,
    listening: AtomicBool,
    shutdown: AtomicBool,
}

impl TcpServer {
    /// Bind to `addr` with default socket settings. The accept loop does not
    /// run until [`TcpServer::start`].
    pub fn bind(addr: impl std::net::ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        Self::bind_with_settings(addr, TcpSettings::default())
    }

    /// Bind with explicit socket settings.
    pub fn bind_with_settings(
        addr: impl std::net::ToSocketAddrs + std::fmt::Display,
        settings: TcpSettings,
    ) -> Result<Self> {
        let socket = TcpSocket::bind(addr)?;
        Ok(Self {
            shared: Arc::new(ServerShared {
                socket,
                settings,
                events: Mutex::new(Arc::new(NullEvents)),
                registry: PeerRegistry::new(),
                listening: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Replace the event sink. May be called at any time.
    pub fn set_events(&self, events: Arc<dyn ServerEvents>) {
        *lock_unpoisoned(&self.shared.events) = events;
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.socket.local_addr()?)
    }

    /// Start accepting connections.
    pub fn start(&self) -> Result<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(PeerError::Stopped);
        }
        if self.shared.listening.swap(true, Ordering::AcqRel) {
            return Err(PeerError::AlreadyRunning);
        }

        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("tcplink-accept".into())
            .spawn(move || ServerShared::accept_loop(&shared))
            .map_err(tcplink_transport::TransportError::Io)?;
        Ok(())
    }

    /// Disconnect every peer (best-effort farewell frame first) and stop
    /// accepting. A stopped server cannot be restarted.
    pub fn stop(&self) -> Result<()> {
        if !self.shared.listening.load(Ordering::Acquire) {
            return Err(PeerError::NotRunning);
        }
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return Err(PeerError::NotRunning);
        }

        for conn in self.shared.registry.drain() {
            let _ = conn.send(FAREWELL, None);
            self.shared
                .events()
                .peer_disconnected(conn.identity(), DisconnectReason::Kicked);
            conn.close(DisconnectReason::Kicked);
        }

        self.shared.listening.store(false, Ordering::Release);

        // Wake the accept loop if it is parked in accept().
        if let Ok(addr) = self.shared.socket.local_addr() {
            let _ = TcpSocket::connect(&addr.to_string(), Duration::from_millis(100));
        }

        info!("server stopped");
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire)
    }

    /// Point-in-time snapshot of registered peer identities.
    pub fn peers(&self) -> Vec<String> {
        self.shared.registry.identities()
    }

    /// Whether a peer is registered and its connection still reports
    /// `Connected`.
    pub fn is_peer_connected(&self, identity: &str) -> bool {
        self.shared
            .registry
            .get(identity)
            .is_some_and(|conn| conn.is_connected())
    }

    /// Interrogate a peer's socket directly instead of trusting the last
    /// known state. The socket timeouts can delay the normal failure path,
    /// so this answers immediately.
    pub fn probe_peer(&self, identity: &str) -> bool {
        self.shared
            .registry
            .get(identity)
            .is_some_and(|conn| conn.probe_connected())
    }

    /// Remove a peer from the registry and close its connection.
    ///
    /// The event sink hears `Kicked` if the connection was still live,
    /// `Timeout` if it had already failed. Returns whether an entry was
    /// found and removed.
    pub fn disconnect_peer(&self, identity: &str) -> bool {
        match self.shared.registry.remove(identity) {
            Some(conn) => {
                let reason = if conn.is_connected() {
                    DisconnectReason::Kicked
                } else {
                    DisconnectReason::Timeout
                };
                self.shared.events().peer_disconnected(identity, reason);
                conn.close(reason);
                true
            }
            None => false,
        }
    }

    /// Send one frame to a registered peer.
    ///
    /// Returns `false` (with an error log) if the identity is unknown or the
    /// send fails; the underlying error never reaches the caller.
    pub fn send_to(&self, identity: &str, payload: &[u8], headers: Option<&Headers>) -> bool {
        let Some(conn) = self.shared.registry.get(identity) else {
            error!(identity, "peer not connected, cannot send");
            return false;
        };
        match conn.send(payload, headers) {
            Ok(()) => true,
            Err(err) => {
                error!(identity, error = %err, "failed to send to peer");
                false
            }
        }
    }

    /// Send one frame to every peer registered at call time.
    ///
    /// The membership is snapshotted first: peers added afterwards are not
    /// included, peers removed mid-iteration are skipped. At-most-once,
    /// best-effort delivery.
    pub fn broadcast(&self, payload: &[u8], headers: Option<&Headers>) {
        for identity in self.shared.registry.identities() {
            self.send_to(&identity, payload, headers);
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl ServerShared {
    fn events(&self) -> Arc<dyn ServerEvents> {
        Arc::clone(&lock_unpoisoned(&self.events))
    }

    fn accept_loop(shared: &Arc<Self>) {
        info!("server initialized, waiting for connections");

        while !shared.shutdown.load(Ordering::Acquire) {
            let (stream, addr) = match shared.socket.accept() {
                Ok(pair) => pair,
                Err(err) => {
                    if shared.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };

            // stop() dials the listener once to unblock accept.
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            if let Err(err) = Self::register_peer(shared, stream, addr) {
                error!(remote = %addr, error = %err, "failed to register peer");
            }
        }

        debug!("accept loop ended");
    }

    fn register_peer(shared: &Arc<Self>, stream: NetStream, addr: SocketAddr) -> Result<()> {
        let identity = addr.to_string();
        if shared.registry.contains(&identity) {
            // Rejecting here drops the new stream and closes it; the
            // registered connection is unaffected.
            return Err(PeerError::DuplicatePeer(identity));
        }

        let conn = PeerConnection::new(stream, identity.clone(), &shared.settings)?;
        if shared.registry.try_insert(Arc::clone(&conn)).is_err() {
            return Err(PeerError::DuplicatePeer(identity));
        }

        info!(identity = %identity, "peer registered");
        shared.events().peer_connected(&identity);

        let observer = Arc::new(RegistryObserver {
            shared: Arc::downgrade(shared),
        });
        if let Err(err) = conn.start(observer) {
            shared.registry.remove(&identity);
            return Err(err);
        }
        Ok(())
    }
}

/// Routes a registered connection's notifications into the registry: frames
/// go to the event sink, a failed connection removes itself from the table.
struct RegistryObserver {
    shared: Weak<ServerShared>,
}

impl ConnectionObserver for RegistryObserver {
    fn frame_received(&self, identity: &str, frame: Frame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events().frame_received(identity, frame);
        }
    }

    fn disconnected(&self, identity: &str, reason: DisconnectReason) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        // Only the path that actually removes the entry notifies; an entry
        // already removed by disconnect_peer or stop stays silent here.
        if let Some(conn) = shared.registry.remove(identity) {
            shared.events().peer_disconnected(identity, reason);
            conn.close(reason);
        }
    }
}
