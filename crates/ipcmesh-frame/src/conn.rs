use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::codec::{decode_frame, encode_frame, FrameConfig, LEN_PREFIX_SIZE};
use crate::error::{FrameError, Result};

/// Received messages are handed over one at a time; capacity 1 keeps
/// rendezvous-style backpressure between the reader and the consumer.
const RECV_CAPACITY: usize = 1;

/// Read chunk size for the background reader.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// One framed endpoint of a connected stream socket.
///
/// A `Connection` owns a background reader task that turns the inbound byte
/// stream into whole messages; callers never see partial reads. Cloning is
/// cheap and shares the endpoint (a server keeps clones of accepted
/// connections for bulk teardown).
///
/// At most one reader task ever runs per connection. [`close`](Self::close)
/// is idempotent; sends and receives racing a close observe the closing state
/// and return cleanly.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

#[derive(Debug)]
struct ConnInner {
    writer: Mutex<OwnedWriteHalf>,
    incoming: Mutex<mpsc::Receiver<Bytes>>,
    cancel: CancellationToken,
    reader: StdMutex<Option<JoinHandle<()>>>,
    config: FrameConfig,
}

impl Connection {
    /// Wrap an already-connected stream with default configuration.
    ///
    /// Spawns the reader task, so this must run inside a Tokio runtime.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self::from_stream_with_config(stream, FrameConfig::default())
    }

    /// Wrap an already-connected stream with an explicit configuration.
    pub fn from_stream_with_config(stream: UnixStream, config: FrameConfig) -> Self {
        Self::spawn(stream, CancellationToken::new(), config)
    }

    pub(crate) fn spawn(
        stream: UnixStream,
        cancel: CancellationToken,
        config: FrameConfig,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(RECV_CAPACITY);
        let reader = tokio::spawn(read_loop(read_half, tx, cancel.clone(), config.clone()));
        Self {
            inner: Arc::new(ConnInner {
                writer: Mutex::new(write_half),
                incoming: Mutex::new(rx),
                cancel,
                reader: StdMutex::new(Some(reader)),
                config,
            }),
        }
    }

    /// Send one payload as a single frame.
    ///
    /// The length prefix and payload are written under the connection's write
    /// lock, so concurrent sends never interleave their bytes on the wire.
    /// Returns the number of payload bytes written.
    pub async fn send(&self, payload: &[u8]) -> Result<usize> {
        if payload.len() > self.inner.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.inner.config.max_payload_size,
            });
        }
        if self.inner.cancel.is_cancelled() {
            return Err(FrameError::ConnectionClosed);
        }
        let mut frame = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
        encode_frame(payload, &mut frame)?;

        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&frame).await.map_err(write_error)?;
        Ok(payload.len())
    }

    /// Receive the next message, waiting until one arrives.
    ///
    /// Returns `None` once the connection has no more data to deliver: the
    /// peer disconnected or this side closed. An empty payload is a valid
    /// message and comes back as `Some` of an empty buffer.
    pub async fn recv(&self) -> Option<Bytes> {
        if self.inner.cancel.is_cancelled() {
            return None;
        }
        let mut incoming = self.inner.incoming.lock().await;
        tokio::select! {
            msg = incoming.recv() => msg,
            _ = self.inner.cancel.cancelled() => None,
        }
    }

    /// Receive the next message if one is already queued; never waits.
    pub fn try_recv(&self) -> Option<Bytes> {
        if self.inner.cancel.is_cancelled() {
            return None;
        }
        match self.inner.incoming.try_lock() {
            Ok(mut incoming) => incoming.try_recv().ok(),
            Err(_) => None,
        }
    }

    /// Close the connection: signal cancellation, join the reader task, and
    /// shut down the write side of the stream.
    ///
    /// Idempotent. After the first close returns, every pending and future
    /// receive yields `None` and every send fails with
    /// [`FrameError::ConnectionClosed`].
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let reader = lock_unpoisoned(&self.inner.reader).take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Whether this connection has been closed, locally or by its server.
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl Drop for ConnInner {
    fn drop(&mut self) {
        // Unblocks the reader task when the last handle is dropped without close().
        self.cancel.cancel();
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_error(err: std::io::Error) -> FrameError {
    match err.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::NotConnected => FrameError::ConnectionClosed,
        _ => FrameError::Io(err),
    }
}

/// Background reader: accumulates stream bytes, drains complete frames into
/// the receive channel, and races every handoff against cancellation so it
/// can exit promptly during shutdown even with no consumer present.
///
/// Exit conditions: clean EOF between frames (peer disconnect, not an error);
/// cancellation; a read error; or a protocol fault. EOF in the middle of a
/// frame and an oversized declared length are protocol faults and close the
/// connection rather than desynchronizing every later frame.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    config: FrameConfig,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        loop {
            match decode_frame(&mut buf, config.max_payload_size) {
                Ok(Some(payload)) => {
                    tokio::select! {
                        res = tx.send(payload) => {
                            if res.is_err() {
                                return; // consumer side dropped
                            }
                        }
                        _ = cancel.cancelled() => return,
                    }
                }
                Ok(None) => break, // need more data
                Err(err) => {
                    error!(error = %err, "frame decode failed; closing connection");
                    cancel.cancel();
                    return;
                }
            }
        }

        tokio::select! {
            res = read_half.read_buf(&mut buf) => match res {
                Ok(0) => {
                    if !buf.is_empty() {
                        warn!(pending = buf.len(), "stream ended mid-frame; closing connection");
                        cancel.cancel();
                    }
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    if !cancel.is_cancelled() {
                        warn!(error = %err, "stream read failed");
                    }
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn pair() -> (Connection, Connection) {
        let (a, b) = UnixStream::pair().unwrap();
        (Connection::from_stream(a), Connection::from_stream(b))
    }

    #[tokio::test]
    async fn send_recv_roundtrip() {
        let (a, b) = pair();
        let n = a.send(b"hello").await.unwrap();
        assert_eq!(n, 5);
        let msg = b.recv().await.unwrap();
        assert_eq!(msg.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn empty_payload_roundtrip() {
        let (a, b) = pair();
        a.send(b"").await.unwrap();
        let msg = b.recv().await;
        assert_eq!(msg.as_deref(), Some(&b""[..]));
    }

    #[tokio::test]
    async fn try_recv_does_not_block() {
        let (a, b) = pair();
        assert!(b.try_recv().is_none());

        a.send(b"queued").await.unwrap();
        let mut got = None;
        for _ in 0..100 {
            if let Some(msg) = b.try_recv() {
                got = Some(msg);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(got.as_deref(), Some(&b"queued"[..]));
    }

    #[tokio::test]
    async fn ordered_delivery() {
        let (a, b) = pair();
        let sender = tokio::spawn(async move {
            for i in 0..20u8 {
                a.send(&[i, i, i]).await.unwrap();
            }
            a
        });
        for i in 0..20u8 {
            let msg = b.recv().await.unwrap();
            assert_eq!(msg.as_ref(), &[i, i, i]);
        }
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_sends_do_not_interleave() {
        let (a, b) = pair();
        let a2 = a.clone();

        let first = tokio::spawn(async move {
            for _ in 0..25 {
                a.send(&[b'x'; 300]).await.unwrap();
            }
        });
        let second = tokio::spawn(async move {
            for _ in 0..25 {
                a2.send(&[b'y'; 300]).await.unwrap();
            }
        });

        for _ in 0..50 {
            let msg = timeout(Duration::from_secs(2), b.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(msg.len(), 300);
            assert!(
                msg.iter().all(|&c| c == b'x') || msg.iter().all(|&c| c == b'y'),
                "frame bytes interleaved across senders"
            );
        }

        first.await.unwrap();
        second.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (a, _b) = pair();
        a.close().await;
        a.close().await;
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn recv_after_close_returns_none() {
        let (a, _b) = pair();
        a.close().await;
        assert!(a.recv().await.is_none());
        assert!(a.try_recv().is_none());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (a, _b) = pair();
        a.close().await;
        let err = a.send(b"late").await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[tokio::test]
    async fn pending_recv_unblocks_on_close() {
        let (a, _b) = pair();
        let a2 = a.clone();
        let blocked = tokio::spawn(async move { a2.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        a.close().await;

        let result = timeout(Duration::from_secs(2), blocked).await.unwrap();
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn peer_close_yields_none() {
        let (a, b) = pair();
        a.close().await;
        let msg = timeout(Duration::from_secs(2), b.recv()).await.unwrap();
        assert!(msg.is_none());
    }

    #[tokio::test]
    async fn oversized_send_is_rejected() {
        let (raw_a, _raw_b) = UnixStream::pair().unwrap();
        let a = Connection::from_stream_with_config(
            raw_a,
            FrameConfig {
                max_payload_size: 16,
            },
        );
        let err = a.send(&[0u8; 64]).await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 64, .. }));
    }

    #[tokio::test]
    async fn oversized_inbound_frame_closes_connection() {
        let (raw_a, mut raw_b) = UnixStream::pair().unwrap();
        let a = Connection::from_stream_with_config(
            raw_a,
            FrameConfig {
                max_payload_size: 16,
            },
        );

        // Declare a payload far beyond the configured cap.
        raw_b.write_all(&1024u32.to_le_bytes()).await.unwrap();

        let msg = timeout(Duration::from_secs(2), a.recv()).await.unwrap();
        assert!(msg.is_none());
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn truncated_frame_closes_connection() {
        let (raw_a, mut raw_b) = UnixStream::pair().unwrap();
        let a = Connection::from_stream(raw_a);

        // Declare 10 payload bytes but deliver only 3, then disconnect.
        raw_b.write_all(&10u32.to_le_bytes()).await.unwrap();
        raw_b.write_all(&[1, 2, 3]).await.unwrap();
        drop(raw_b);

        let msg = timeout(Duration::from_secs(2), a.recv()).await.unwrap();
        assert!(msg.is_none());
    }

    #[tokio::test]
    async fn messages_before_disconnect_are_still_delivered() {
        let (a, b) = pair();
        a.send(b"parting").await.unwrap();
        // Wait for the frame to cross before tearing the sender down.
        let msg = timeout(Duration::from_secs(2), b.recv()).await.unwrap();
        assert_eq!(msg.as_deref(), Some(&b"parting"[..]));
        a.close().await;
        assert!(b.recv().await.is_none());
    }
}
