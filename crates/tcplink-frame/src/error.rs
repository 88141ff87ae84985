/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The 4-byte length prefix held a negative value.
    #[error("negative header block length {0}")]
    InvalidHeaderLength(i32),

    /// The header block exceeds the maximum size.
    #[error("header block too large ({size} bytes, max {max})")]
    HeaderBlockTooLarge { size: usize, max: usize },

    /// The header block has no `Content-length` line.
    #[error("frame is missing the Content-length header")]
    MissingContentLength,

    /// The `Content-length` value is not a non-negative integer.
    #[error("invalid Content-length value {value:?}")]
    InvalidContentLength { value: String },

    /// The declared payload length exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error means the stream can no longer be resynchronized.
    ///
    /// Protocol violations are fatal to the connection: the only recovery is
    /// to drop it. Connection loss and plain I/O errors are reported
    /// separately so owners can distinguish a misbehaving peer from a dead
    /// one.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidHeaderLength(_)
                | FrameError::HeaderBlockTooLarge { .. }
                | FrameError::MissingContentLength
                | FrameError::InvalidContentLength { .. }
                | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
