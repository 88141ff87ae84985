/// Errors that can occur in TCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The address string did not resolve to any socket address.
    #[error("address {0} did not resolve to any socket address")]
    Unresolvable(String),

    /// A socket timeout was configured as zero.
    ///
    /// A zero duration means "block forever" on std sockets, which is the
    /// opposite of what a timeout setting asks for.
    #[error("{0} timeout must be greater than zero")]
    InvalidTimeout(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
