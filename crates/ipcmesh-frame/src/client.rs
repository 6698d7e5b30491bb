use std::path::Path;

use ipcmesh_transport::UnixDomainSocket;

use crate::codec::FrameConfig;
use crate::conn::Connection;
use crate::error::Result;

/// Dial a listening socket path and return a ready [`Connection`].
///
/// Fails with a connect error if no listener is present. The returned
/// connection behaves exactly like a server-accepted one: same reader task,
/// same close semantics.
pub async fn connect(path: impl AsRef<Path>) -> Result<Connection> {
    connect_with_config(path, FrameConfig::default()).await
}

/// Dial with an explicit configuration.
pub async fn connect_with_config(
    path: impl AsRef<Path>,
    config: FrameConfig,
) -> Result<Connection> {
    let stream = UnixDomainSocket::connect(path).await?;
    Ok(Connection::from_stream_with_config(stream, config))
}
