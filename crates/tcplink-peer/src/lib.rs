//! Peer connection lifecycle management for tcplink.
//!
//! This is the "just works" layer. A [`TcpClient`] dials a server and keeps
//! the connection alive through its reconnect schedule; a [`TcpServer`]
//! accepts peers into a registry keyed by remote `ip:port` identity.
//! Frames and lifecycle transitions are delivered through the
//! [`ClientEvents`]/[`ServerEvents`] observer traits; diagnostics go to the
//! `tracing` subscriber.

pub mod client;
pub mod error;
pub mod events;
pub mod peer;
pub mod registry;
pub mod scheduler;
pub mod server;

pub use client::{ClientConfig, TcpClient, DEFAULT_CONNECT_TIMEOUT};
pub use error::{PeerError, Result};
pub use events::{ClientEvents, DisconnectReason, NullEvents, ServerEvents};
pub use peer::{ConnectionObserver, ConnectionState, PeerConnection};
pub use registry::PeerRegistry;
pub use scheduler::Scheduler;
pub use server::TcpServer;
