use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::NetStream;

/// TCP listening socket.
///
/// Provides bind/accept on the server side and a connect-with-timeout dialer
/// for clients. Address resolution goes through [`ToSocketAddrs`]; each
/// resolved candidate is dialed in turn until one succeeds.
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on a TCP address such as `"127.0.0.1:7000"`.
    ///
    /// Binding to port 0 picks an ephemeral port; see [`TcpSocket::local_addr`].
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let display = addr.to_string();
        let listener = TcpListener::bind(&addr).map_err(|e| TransportError::Bind {
            addr: display.clone(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: display,
            source: e,
        })?;

        info!(%local_addr, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    ///
    /// Returns the connected stream and the remote address it came from.
    pub fn accept(&self) -> Result<(NetStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(remote = %addr, "accepted connection");
        Ok((NetStream::from_tcp(stream), addr))
    }

    /// Connect to a listening TCP socket, bounded by `timeout` per candidate
    /// address (blocking).
    pub fn connect(addr: &str, timeout: Duration) -> Result<NetStream> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?
            .collect();

        if candidates.is_empty() {
            return Err(TransportError::Unresolvable(addr.to_string()));
        }

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    debug!(remote = %candidate, "connected to tcp socket");
                    return Ok(NetStream::from_tcp(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(TransportError::Connect {
            addr: addr.to_string(),
            source: last_err.expect("at least one candidate was dialed"),
        })
    }

    /// The local address this socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
