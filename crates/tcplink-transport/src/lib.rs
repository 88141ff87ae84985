//! Blocking TCP transport abstraction.
//!
//! This is the lowest layer of tcplink. It provides [`TcpSocket`] for
//! bind/accept/connect and [`NetStream`] as the connected byte stream
//! everything else builds on, plus the [`TcpSettings`] timeout configuration
//! applied to every connection.

pub mod error;
pub mod settings;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use settings::{TcpSettings, DEFAULT_IO_TIMEOUT};
pub use stream::NetStream;
pub use tcp::TcpSocket;
