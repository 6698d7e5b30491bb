use ipcmesh_frame::FrameError;

/// Errors from the addressed messaging layer.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// A framing- or transport-layer failure underneath the router.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A routed message had no NUL separator between name and payload.
    #[error("malformed routed message: missing name separator")]
    MissingSeparator,

    /// A client name (or the name segment of a routed message) was empty.
    #[error("client name must not be empty")]
    EmptyName,

    /// A client name contained the NUL separator byte.
    #[error("client name must not contain NUL")]
    NameContainsSeparator,

    /// The name segment of a routed message was not valid UTF-8.
    #[error("client name is not valid UTF-8")]
    NameNotUtf8,

    /// The identity handshake could not be sent at construction.
    #[error("handshake send failed: {0}")]
    Handshake(#[source] FrameError),
}

pub type Result<T> = std::result::Result<T, RouterError>;
