use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// A bound, listening Unix domain socket.
///
/// Binding happens through the standard library so the socket file can be
/// validated and permission-hardened before the descriptor is registered with
/// the Tokio reactor; the resulting listener and every accepted stream are
/// Tokio types. Constructors and [`accept`](Self::accept) must therefore run
/// inside a Tokio runtime.
///
/// The socket file is removed when the listener is dropped, guarded by the
/// inode recorded at bind time so a replacement listener's file is left alone.
#[derive(Debug)]
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    /// Whether the path should be removed on drop.
    cleanup_on_drop: bool,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(target_os = "macos")]
    const MAX_PATH_LEN: usize = 104;
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If `path` already exists and is a socket it is removed first (stale
    /// socket cleanup); any other kind of existing file fails the bind.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit permission mode instead of the 0600 default.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        Self::remove_stale_socket(&path)?;

        let bind_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| TransportError::Bind {
                path: path.clone(),
                source,
            }
        };

        let std_listener =
            std::os::unix::net::UnixListener::bind(&path).map_err(bind_err(&path))?;
        std_listener.set_nonblocking(true).map_err(bind_err(&path))?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err(&path))?;
        let created_metadata = std::fs::symlink_metadata(&path).map_err(bind_err(&path))?;
        let created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        let listener = UnixListener::from_std(std_listener).map_err(bind_err(&path))?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode,
            cleanup_on_drop: true,
        })
    }

    /// Remove an existing socket file at `path`; never remove non-socket
    /// files, and never steal a path a live listener is still serving.
    fn remove_stale_socket(path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let metadata = std::fs::symlink_metadata(path).map_err(|e| TransportError::Bind {
            path: path.to_path_buf(),
            source: e,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(TransportError::Bind {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                ),
            });
        }
        // A connect that succeeds means somebody is accepting on this path.
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(TransportError::Bind {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "socket is in use by a live listener",
                ),
            });
        }
        debug!(?path, "removing stale socket");
        std::fs::remove_file(path).map_err(|e| TransportError::Bind {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(stream)
    }

    /// Connect to a listening Unix domain socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<UnixStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(stream)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if self.cleanup_on_drop {
            if let Some((expected_dev, expected_ino)) = self.created_inode {
                if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                    if metadata.file_type().is_socket()
                        && metadata.dev() == expected_dev
                        && metadata.ino() == expected_ino
                    {
                        debug!(path = ?self.path, "cleaning up socket file");
                        let _ = std::fs::remove_file(&self.path);
                    } else {
                        debug!(
                            path = ?self.path,
                            "socket path identity changed; skipping cleanup"
                        );
                    }
                }
            }
        }
    }
}
