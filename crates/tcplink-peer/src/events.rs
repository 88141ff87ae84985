use tcplink_frame::Frame;

/// Why a connection left the `Connected` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Removed by an explicit caller action on the owning side.
    Kicked,
    /// The connection's own failure path: the transport died or timed out.
    Timeout,
    /// The peer violated the framing protocol; the stream cannot be
    /// resynchronized.
    Protocol,
    /// Local teardown (client stop or drop).
    Stopped,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::Protocol => "protocol violation",
            DisconnectReason::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Observer callbacks for a client connection.
///
/// All methods are fire-and-forget and default to no-ops; implement only
/// what you need. Callbacks run on the connection's receive thread (or the
/// thread performing the state change), so they should return promptly.
pub trait ClientEvents: Send + Sync {
    /// The client established a connection to the server.
    fn connected(&self) {}

    /// The connection was lost or torn down.
    fn disconnected(&self, reason: DisconnectReason) {
        let _ = reason;
    }

    /// A complete frame arrived from the server.
    fn frame_received(&self, frame: Frame) {
        let _ = frame;
    }
}

/// Observer callbacks for a server.
///
/// Same delivery contract as [`ClientEvents`]; `identity` is the remote
/// `ip:port` string the peer is registered under.
pub trait ServerEvents: Send + Sync {
    /// A new peer connected and was registered.
    fn peer_connected(&self, identity: &str) {
        let _ = identity;
    }

    /// A registered peer was removed.
    fn peer_disconnected(&self, identity: &str, reason: DisconnectReason) {
        let _ = (identity, reason);
    }

    /// A complete frame arrived from a registered peer.
    fn frame_received(&self, identity: &str, frame: Frame) {
        let _ = (identity, frame);
    }
}

/// Event sink that ignores every notification.
pub struct NullEvents;

impl ClientEvents for NullEvents {}
impl ServerEvents for NullEvents {}
