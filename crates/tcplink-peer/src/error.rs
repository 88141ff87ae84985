/// Errors that can occur in peer operations.
///
/// Only precondition violations surface through `send`-shaped calls;
/// transport failures during an established connection's lifetime are
/// absorbed into state transitions and observer notifications instead.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] tcplink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] tcplink_frame::FrameError),

    /// A send was attempted with an empty payload.
    #[error("cannot send an empty payload")]
    EmptyPayload,

    /// A send was attempted while not connected.
    #[error("not connected to peer {0}")]
    NotConnected(String),

    /// Start was called on a client or server that is already running.
    #[error("already running")]
    AlreadyRunning,

    /// Stop was called on a client or server that is not running.
    #[error("not running")]
    NotRunning,

    /// The client or server has been stopped and cannot be restarted.
    #[error("already stopped")]
    Stopped,

    /// The address string is empty or has no port.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// A connection from this identity is already registered.
    #[error("peer {0} already connected")]
    DuplicatePeer(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
