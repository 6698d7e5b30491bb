use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use bytes::Bytes;
use ipcmesh_frame::{Connection, FrameConfig, Server};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::envelope::{encode_envelope, split_envelope, validate_name};
use crate::error::Result;

/// Stage-to-stage handoffs carry one item at a time, like the frame layer's
/// receive channel.
const STAGE_CAPACITY: usize = 1;

/// A `(name, connection)` pair produced by a completed handshake.
type Registration = (String, Connection);

/// One message traveling from a client listener to the dispatch stage.
struct Inbound {
    source: String,
    dest: String,
    payload: Bytes,
}

/// The rendezvous server of the mesh: accepts framed connections, learns each
/// client's name from its handshake, and forwards every routed message to the
/// connection registered under its destination name.
///
/// Per accepted connection the lifecycle is handshake, registration,
/// forwarding, closed. The name directory lives inside the dispatch task and
/// is mutated only there; registration hands it `(name, connection)` pairs
/// over a channel, so no lock guards it. The last client to register a name
/// wins; there is no collision detection.
///
/// Messages addressed to an unregistered name are logged and dropped; nothing
/// is buffered for clients that have not connected yet.
pub struct Router {
    path: PathBuf,
    cancel: CancellationToken,
    server: Arc<Server>,
    handshake_task: StdMutex<Option<JoinHandle<()>>>,
    registration_task: StdMutex<Option<JoinHandle<()>>>,
    dispatch_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Router {
    /// Bind the router's listening socket and start the pipeline.
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_config(path, FrameConfig::default()).await
    }

    /// Bind with an explicit frame configuration for accepted connections.
    pub async fn bind_with_config(path: impl AsRef<Path>, config: FrameConfig) -> Result<Self> {
        let server = Arc::new(Server::bind_with_config(path, config).await?);
        let path = server.path().to_path_buf();
        let cancel = CancellationToken::new();

        let (pairs_tx, pairs_rx) = mpsc::channel::<Registration>(STAGE_CAPACITY);
        let (registered_tx, registered_rx) = mpsc::channel::<Registration>(STAGE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(STAGE_CAPACITY);

        let handshake_task = tokio::spawn(handshake_stage(
            Arc::clone(&server),
            pairs_tx,
            cancel.clone(),
        ));
        let registration_task = tokio::spawn(registration_stage(
            pairs_rx,
            registered_tx,
            inbound_tx,
            cancel.clone(),
        ));
        let dispatch_task = tokio::spawn(dispatch_stage(inbound_rx, registered_rx, cancel.clone()));

        info!(?path, "router listening");

        Ok(Self {
            path,
            cancel,
            server,
            handshake_task: StdMutex::new(Some(handshake_task)),
            registration_task: StdMutex::new(Some(registration_task)),
            dispatch_task: StdMutex::new(Some(dispatch_task)),
        })
    }

    /// The socket path this router is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shut the router down: close the underlying server (which closes every
    /// client connection and unblocks every listener), signal cancellation,
    /// and join all pipeline tasks. Idempotent; when it returns, no task
    /// owned by this router is still running.
    pub async fn close(&self) {
        self.server.close().await;
        self.cancel.cancel();

        for slot in [
            &self.handshake_task,
            &self.registration_task,
            &self.dispatch_task,
        ] {
            let task = lock_unpoisoned(slot).take();
            if let Some(task) = task {
                let _ = task.await;
            }
        }
    }
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stage 1: one probe task per accepted connection, reading exactly one
/// message: the declared name. Connections that disconnect, stay silent
/// until shutdown, or declare an unusable name never produce a registration.
async fn handshake_stage(
    server: Arc<Server>,
    pairs_tx: mpsc::Sender<Registration>,
    cancel: CancellationToken,
) {
    let probes = TaskTracker::new();
    loop {
        let conn = tokio::select! {
            conn = server.accept() => match conn {
                Some(conn) => conn,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let pairs_tx = pairs_tx.clone();
        probes.spawn(async move {
            let Some(first) = conn.recv().await else {
                return; // dropped before declaring a name
            };
            let Ok(name) = std::str::from_utf8(&first) else {
                debug!("discarding connection with non-utf8 name");
                return;
            };
            if validate_name(name).is_err() {
                debug!("discarding connection with unusable name");
                return;
            }
            let name = name.to_string();
            debug!(name = %name, "handshake received");
            // Send failure means the registration stage is gone: router closing.
            let _ = pairs_tx.send((name, conn)).await;
        });
    }
    probes.close();
    probes.wait().await;
}

/// Stage 2: start one listener per handshaken client, then pass the pair on
/// to dispatch. When the handshake stage has finished and every listener has
/// exited, dropping `inbound_tx` (and the listeners' clones of it) closes the
/// inbound channel, which is what lets dispatch drain and stop.
async fn registration_stage(
    mut pairs_rx: mpsc::Receiver<Registration>,
    registered_tx: mpsc::Sender<Registration>,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    let listeners = TaskTracker::new();
    while let Some((name, conn)) = pairs_rx.recv().await {
        listeners.spawn(client_listener(
            name.clone(),
            conn.clone(),
            inbound_tx.clone(),
            cancel.clone(),
        ));
        if registered_tx.send((name, conn)).await.is_err() {
            break; // dispatch is gone; router closing
        }
    }
    drop(inbound_tx);
    listeners.close();
    listeners.wait().await;
}

/// Stage 3: per-client listener. Receives routed frames from one client and
/// feeds them to dispatch tagged with this client as the source. A frame with
/// no separator is logged and forwarded with an empty destination, which
/// dispatch then drops as unknown.
async fn client_listener(
    name: String,
    conn: Connection,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    debug!(name = %name, "client listener started");
    loop {
        let Some(frame) = conn.recv().await else {
            break; // client disconnected or router closing
        };
        let (dest, payload) = match split_envelope(frame.clone()) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(name = %name, error = %err, "unroutable message");
                (String::new(), frame)
            }
        };
        let inbound = Inbound {
            source: name.clone(),
            dest,
            payload,
        };
        tokio::select! {
            res = inbound_tx.send(inbound) => {
                if res.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    debug!(name = %name, "client listener stopped");
}

/// Stage 4: the single dispatch task. Owns the name directory and is its only
/// writer; exits when cancellation fires or the inbound channel closes.
async fn dispatch_stage(
    mut inbound_rx: mpsc::Receiver<Inbound>,
    mut registered_rx: mpsc::Receiver<Registration>,
    cancel: CancellationToken,
) {
    let mut directory: HashMap<String, Connection> = HashMap::new();
    let mut registrations_open = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = inbound_rx.recv() => {
                let Some(msg) = msg else { break };
                forward(&directory, msg).await;
            }
            pair = registered_rx.recv(), if registrations_open => {
                match pair {
                    Some((name, conn)) => {
                        debug!(name = %name, "endpoint registered");
                        directory.insert(name, conn);
                    }
                    None => registrations_open = false,
                }
            }
        }
    }
}

async fn forward(directory: &HashMap<String, Connection>, msg: Inbound) {
    let Some(dest) = directory.get(&msg.dest) else {
        warn!(source = %msg.source, dest = %msg.dest, "dropping message for unknown destination");
        return;
    };
    let frame = encode_envelope(&msg.source, &msg.payload);
    if let Err(err) = dest.send(&frame).await {
        warn!(source = %msg.source, dest = %msg.dest, error = %err, "forward failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::NamedClient;
    use std::time::Duration;
    use tokio::time::timeout;

    const PROBE: &[u8] = b"__probe__";

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

    /// Self-route a probe until it comes back: proof the router's directory
    /// maps this client's name to its connection.
    async fn wait_until_registered(client: &NamedClient) {
        for _ in 0..50 {
            client.send(client.name(), PROBE).await.unwrap();
            if let Ok(Ok(Some(_))) = timeout(Duration::from_millis(100), client.recv()).await {
                // Absorb any extra probes still in flight.
                while let Ok(Ok(Some(_))) =
                    timeout(Duration::from_millis(50), client.recv()).await
                {
                }
                return;
            }
        }
        panic!("client {:?} never became routable", client.name());
    }

    #[tokio::test]
    async fn handshake_registers_name() {
        let path = make_sock_path("register");
        let router = Router::bind(&path).await.unwrap();
        assert_eq!(router.path(), path.as_path());

        let c1 = NamedClient::connect(&path, "c1").await.unwrap();
        wait_until_registered(&c1).await;

        router.close().await;
    }

    #[tokio::test]
    async fn routes_between_named_clients() {
        let path = make_sock_path("route");
        let router = Router::bind(&path).await.unwrap();

        let c1 = NamedClient::connect(&path, "c1").await.unwrap();
        let c2 = NamedClient::connect(&path, "c2").await.unwrap();
        wait_until_registered(&c2).await;

        c1.send("c2", b"hello").await.unwrap();
        let msg = timeout(Duration::from_secs(2), c2.recv())
            .await
            .unwrap()
            .unwrap();
        let (source, payload) = msg.unwrap();
        assert_eq!(source, "c1");
        assert_eq!(payload.as_ref(), b"hello");

        router.close().await;
    }

    #[tokio::test]
    async fn unknown_destination_dropped() {
        let path = make_sock_path("unknown");
        let router = Router::bind(&path).await.unwrap();

        let c1 = NamedClient::connect(&path, "c1").await.unwrap();
        wait_until_registered(&c1).await;

        c1.send("nonexistent", b"x").await.unwrap();
        assert!(
            timeout(Duration::from_millis(200), c1.recv()).await.is_err(),
            "nothing should come back for an unknown destination"
        );

        // The router keeps working afterwards.
        c1.send("c1", b"still-alive").await.unwrap();
        let msg = timeout(Duration::from_secs(2), c1.recv())
            .await
            .unwrap()
            .unwrap();
        let (source, payload) = msg.unwrap();
        assert_eq!(source, "c1");
        assert_eq!(payload.as_ref(), b"still-alive");

        router.close().await;
    }

    #[tokio::test]
    async fn frame_without_separator_is_survivable() {
        let path = make_sock_path("malformed");
        let router = Router::bind(&path).await.unwrap();

        let c2 = NamedClient::connect(&path, "c2").await.unwrap();
        wait_until_registered(&c2).await;

        // A raw framed client can hand the router arbitrary bytes.
        let raw = ipcmesh_frame::connect(&path).await.unwrap();
        raw.send(b"rawling").await.unwrap(); // handshake
        raw.send(b"no separator at all").await.unwrap();
        raw.send(b"c2\0hi").await.unwrap();

        let msg = timeout(Duration::from_secs(2), c2.recv())
            .await
            .unwrap()
            .unwrap();
        let (source, payload) = msg.unwrap();
        assert_eq!(source, "rawling");
        assert_eq!(payload.as_ref(), b"hi");

        raw.close().await;
        router.close().await;
    }

    #[tokio::test]
    async fn last_registrant_wins() {
        let path = make_sock_path("dup");
        let router = Router::bind(&path).await.unwrap();

        let first = NamedClient::connect(&path, "dup").await.unwrap();
        wait_until_registered(&first).await;

        // Once the second client can self-route, the name points at it.
        let second = NamedClient::connect(&path, "dup").await.unwrap();
        wait_until_registered(&second).await;

        let c3 = NamedClient::connect(&path, "c3").await.unwrap();
        c3.send("dup", b"marker").await.unwrap();

        let msg = timeout(Duration::from_secs(2), second.recv())
            .await
            .unwrap()
            .unwrap();
        let (source, payload) = msg.unwrap();
        assert_eq!(source, "c3");
        assert_eq!(payload.as_ref(), b"marker");

        // The displaced client may have soaked up probes, never the marker.
        while let Ok(Ok(Some((_, payload)))) =
            timeout(Duration::from_millis(200), first.recv()).await
        {
            assert_eq!(payload.as_ref(), PROBE);
        }

        router.close().await;
    }

    #[tokio::test]
    async fn close_unblocks_clients() {
        let path = make_sock_path("unblock");
        let router = Router::bind(&path).await.unwrap();

        let c1 = NamedClient::connect(&path, "c1").await.unwrap();
        wait_until_registered(&c1).await;

        let c1_clone = c1.clone();
        let blocked = tokio::spawn(async move { c1_clone.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        router.close().await;

        let result = timeout(Duration::from_secs(2), blocked).await.unwrap();
        assert!(result.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let path = make_sock_path("double-close");
        let router = Router::bind(&path).await.unwrap();
        router.close().await;
        router.close().await;
    }

    #[tokio::test]
    async fn survives_disconnected_destination() {
        let path = make_sock_path("dead-dest");
        let router = Router::bind(&path).await.unwrap();

        let c1 = NamedClient::connect(&path, "c1").await.unwrap();
        let c2 = NamedClient::connect(&path, "c2").await.unwrap();
        wait_until_registered(&c1).await;
        wait_until_registered(&c2).await;

        // c2 stays in the directory after closing; forwarding to it fails
        // quietly and the router moves on.
        c2.close().await;
        c1.send("c2", b"into the void").await.unwrap();

        c1.send("c1", b"ping").await.unwrap();
        let msg = timeout(Duration::from_secs(2), c1.recv())
            .await
            .unwrap()
            .unwrap();
        let (source, payload) = msg.unwrap();
        assert_eq!(source, "c1");
        assert_eq!(payload.as_ref(), b"ping");

        router.close().await;
    }

    #[tokio::test]
    async fn disconnect_before_handshake_is_harmless() {
        let path = make_sock_path("silent");
        let router = Router::bind(&path).await.unwrap();

        let silent = ipcmesh_frame::connect(&path).await.unwrap();
        silent.close().await;

        let c1 = NamedClient::connect(&path, "c1").await.unwrap();
        wait_until_registered(&c1).await;

        router.close().await;
    }
}
