use ipcmesh_transport::TransportError;

/// Errors that can occur while framing messages or setting up endpoints.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is closed; no more data can be sent or received.
    #[error("connection closed")]
    ConnectionClosed,

    /// A transport-layer failure while binding, dialing, or accepting.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
