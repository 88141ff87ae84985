use std::time::Duration;

use crate::error::{Result, TransportError};

/// Default read/write timeout for connected sockets: 10 minutes.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(600);

/// Socket timeout configuration applied to every connected stream.
#[derive(Debug, Clone)]
pub struct TcpSettings {
    /// Timeout for a blocking read before the stream reports an error.
    pub read_timeout: Duration,
    /// Timeout for a blocking write before the stream reports an error.
    pub write_timeout: Duration,
}

impl TcpSettings {
    /// Create settings with explicit timeouts. Zero durations are rejected.
    pub fn new(read_timeout: Duration, write_timeout: Duration) -> Result<Self> {
        if read_timeout.is_zero() {
            return Err(TransportError::InvalidTimeout("read"));
        }
        if write_timeout.is_zero() {
            return Err(TransportError::InvalidTimeout("write"));
        }
        Ok(Self {
            read_timeout,
            write_timeout,
        })
    }
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_IO_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}
