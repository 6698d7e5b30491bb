use std::path::Path;

use bytes::Bytes;
use ipcmesh_frame::{Connection, FrameConfig};
use tracing::debug;

use crate::envelope::{encode_envelope, split_envelope, validate_name};
use crate::error::{Result, RouterError};

/// A client with a declared identity, talking to peers through a router.
///
/// Construction dials the router's socket and immediately sends the raw name
/// bytes as the first framed message (the handshake). After that, every
/// outbound message is `destination NUL payload` and every inbound message is
/// `source NUL payload`.
#[derive(Debug, Clone)]
pub struct NamedClient {
    name: String,
    conn: Connection,
}

impl NamedClient {
    /// Dial `path` and register under `name`.
    ///
    /// Fails if the name is invalid, the dial fails, or the handshake cannot
    /// be sent.
    pub async fn connect(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        Self::connect_with_config(path, name, FrameConfig::default()).await
    }

    /// Dial with an explicit frame configuration.
    pub async fn connect_with_config(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        config: FrameConfig,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        let conn = ipcmesh_frame::connect_with_config(path, config).await?;
        if let Err(err) = conn.send(name.as_bytes()).await {
            conn.close().await;
            return Err(RouterError::Handshake(err));
        }
        debug!(name = %name, "declared identity to router");

        Ok(Self { name, conn })
    }

    /// The identity declared at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send `payload` to the peer registered as `destination`.
    ///
    /// Returns the number of bytes in the routed frame. Delivery is
    /// best-effort: a destination nobody has registered is dropped by the
    /// router, with no error back to this sender.
    pub async fn send(&self, destination: &str, payload: &[u8]) -> Result<usize> {
        validate_name(destination)?;
        let frame = encode_envelope(destination, payload);
        Ok(self.conn.send(&frame).await?)
    }

    /// Wait for the next routed message, returning `(source, payload)`.
    ///
    /// Returns `Ok(None)` once the connection has no more data (router gone
    /// or this side closed). A frame that cannot be split on a NUL is a
    /// decode error.
    pub async fn recv(&self) -> Result<Option<(String, Bytes)>> {
        decode_incoming(self.conn.recv().await)
    }

    /// Like [`recv`](Self::recv) but never waits; `Ok(None)` also means
    /// "nothing queued right now".
    pub fn try_recv(&self) -> Result<Option<(String, Bytes)>> {
        decode_incoming(self.conn.try_recv())
    }

    /// Close the underlying connection. Idempotent.
    pub async fn close(&self) {
        self.conn.close().await;
    }

    /// Whether the underlying connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}

fn decode_incoming(frame: Option<Bytes>) -> Result<Option<(String, Bytes)>> {
    match frame {
        // An empty frame carries no source or payload; treat it like
        // end-of-data rather than a malformed message.
        Some(frame) if frame.is_empty() => Ok(None),
        Some(frame) => split_envelope(frame).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcmesh_frame::{FrameError, Server};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::timeout;

    fn make_sock_path(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        std::env::temp_dir().join(format!(
            "ipcmesh-{}-{}-{}.sock",
            tag,
            std::process::id(),
            nanos
        ))
    }

    #[tokio::test]
    async fn invalid_names_fail_before_dialing() {
        let err = NamedClient::connect("/tmp/never-dialed.sock", "")
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::EmptyName));

        let err = NamedClient::connect("/tmp/never-dialed.sock", "a\0b")
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NameContainsSeparator));
    }

    #[tokio::test]
    async fn connect_fails_without_listener() {
        let path = make_sock_path("no-router");
        let err = NamedClient::connect(&path, "c1").await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::Frame(FrameError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn handshake_is_the_first_frame() {
        let path = make_sock_path("handshake");
        let server = Server::bind(&path).await.unwrap();

        let client = NamedClient::connect(&path, "c1").await.unwrap();
        assert_eq!(client.name(), "c1");

        let conn = timeout(Duration::from_secs(2), server.accept())
            .await
            .unwrap()
            .unwrap();
        let first = timeout(Duration::from_secs(2), conn.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.as_ref(), b"c1");

        server.close().await;
    }

    #[tokio::test]
    async fn outbound_frames_carry_destination_and_payload() {
        let path = make_sock_path("outbound");
        let server = Server::bind(&path).await.unwrap();
        let client = NamedClient::connect(&path, "mic").await.unwrap();

        let conn = timeout(Duration::from_secs(2), server.accept())
            .await
            .unwrap()
            .unwrap();
        let _handshake = conn.recv().await.unwrap();

        client.send("ai", b"hello").await.unwrap();
        let frame = timeout(Duration::from_secs(2), conn.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_ref(), b"ai\0hello");

        server.close().await;
    }

    #[tokio::test]
    async fn inbound_frames_split_into_source_and_payload() {
        let path = make_sock_path("inbound");
        let server = Server::bind(&path).await.unwrap();
        let client = NamedClient::connect(&path, "ai").await.unwrap();

        let conn = timeout(Duration::from_secs(2), server.accept())
            .await
            .unwrap()
            .unwrap();
        let _handshake = conn.recv().await.unwrap();

        conn.send(b"mic\0wake").await.unwrap();
        let msg = timeout(Duration::from_secs(2), client.recv())
            .await
            .unwrap()
            .unwrap();
        let (source, payload) = msg.unwrap();
        assert_eq!(source, "mic");
        assert_eq!(payload.as_ref(), b"wake");

        server.close().await;
    }

    #[tokio::test]
    async fn frame_without_separator_is_a_decode_error() {
        let path = make_sock_path("baddecode");
        let server = Server::bind(&path).await.unwrap();
        let client = NamedClient::connect(&path, "ai").await.unwrap();

        let conn = timeout(Duration::from_secs(2), server.accept())
            .await
            .unwrap()
            .unwrap();
        let _handshake = conn.recv().await.unwrap();

        conn.send(b"no separator").await.unwrap();
        let err = timeout(Duration::from_secs(2), client.recv())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, RouterError::MissingSeparator));

        server.close().await;
    }

    #[tokio::test]
    async fn empty_frame_reads_as_no_data() {
        let path = make_sock_path("emptyframe");
        let server = Server::bind(&path).await.unwrap();
        let client = NamedClient::connect(&path, "ai").await.unwrap();

        let conn = timeout(Duration::from_secs(2), server.accept())
            .await
            .unwrap()
            .unwrap();
        let _handshake = conn.recv().await.unwrap();

        conn.send(b"").await.unwrap();
        let msg = timeout(Duration::from_secs(2), client.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(msg.is_none());

        server.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let path = make_sock_path("client-close");
        let server = Server::bind(&path).await.unwrap();
        let client = NamedClient::connect(&path, "c1").await.unwrap();

        client.close().await;
        client.close().await;
        assert!(client.is_closed());
        assert!(client.recv().await.unwrap().is_none());

        server.close().await;
    }
}
