use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use ipcmesh_transport::UnixDomainSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::error;

use crate::codec::FrameConfig;
use crate::conn::{lock_unpoisoned, Connection};
use crate::error::Result;

/// New connections are handed to the consumer one at a time.
const ACCEPT_CAPACITY: usize = 1;

/// A listening socket that wraps every accepted stream as a [`Connection`].
///
/// Accepted connections are published through [`accept`](Self::accept) exactly
/// once each, and are also tracked internally so [`close`](Self::close) can
/// tear all of them down. The socket-level accept loop is decoupled from
/// delivery: each acceptance spawns a dedicated delivery task, so a consumer
/// slow to pick up one connection never stalls the kernel accept queue.
///
/// Share a server between tasks with `Arc` if more than one needs it.
#[derive(Debug)]
pub struct Server {
    path: PathBuf,
    config: FrameConfig,
    cancel: CancellationToken,
    incoming: Mutex<mpsc::Receiver<Connection>>,
    accepted: Arc<StdMutex<Vec<Connection>>>,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
    deliveries: TaskTracker,
    listener: StdMutex<Option<Arc<UnixDomainSocket>>>,
}

impl Server {
    /// Bind a listening socket at `path` with default configuration.
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_config(path, FrameConfig::default()).await
    }

    /// Bind a listening socket at `path` with an explicit configuration.
    ///
    /// Fails if the path is unavailable (in use by a live listener, not a
    /// socket, or too long for the platform).
    pub async fn bind_with_config(path: impl AsRef<Path>, config: FrameConfig) -> Result<Self> {
        let socket = Arc::new(UnixDomainSocket::bind(path)?);
        let path = socket.path().to_path_buf();

        let (tx, rx) = mpsc::channel(ACCEPT_CAPACITY);
        let cancel = CancellationToken::new();
        let accepted = Arc::new(StdMutex::new(Vec::new()));
        let deliveries = TaskTracker::new();

        let accept_task = tokio::spawn(accept_loop(
            Arc::clone(&socket),
            tx,
            Arc::clone(&accepted),
            deliveries.clone(),
            cancel.clone(),
            config.clone(),
        ));

        Ok(Self {
            path,
            config,
            cancel,
            incoming: Mutex::new(rx),
            accepted,
            accept_task: StdMutex::new(Some(accept_task)),
            deliveries,
            // Dropped on close, after the accept loop's clone is gone, so the
            // socket file is removed exactly when the server winds down.
            listener: StdMutex::new(Some(socket)),
        })
    }

    /// Wait for the next accepted connection.
    ///
    /// Each connection is delivered to exactly one caller. Returns `None`
    /// once the server has closed and no more connections will arrive.
    pub async fn accept(&self) -> Option<Connection> {
        self.incoming.lock().await.recv().await
    }

    /// Shut the server down: stop accepting, join the accept and delivery
    /// tasks, close every connection ever accepted, and remove the socket
    /// file. Idempotent; when it returns no task owned by this server is
    /// still running.
    pub async fn close(&self) {
        self.cancel.cancel();

        let accept_task = lock_unpoisoned(&self.accept_task).take();
        if let Some(task) = accept_task {
            let _ = task.await;
        }

        self.deliveries.close();
        self.deliveries.wait().await;

        // Drop any connection parked in the handoff channel; it was never
        // delivered and is closed with the rest below.
        {
            let mut incoming = self.incoming.lock().await;
            while incoming.try_recv().is_ok() {}
        }

        let accepted: Vec<Connection> = {
            let mut accepted = lock_unpoisoned(&self.accepted);
            accepted.drain(..).collect()
        };
        for conn in accepted {
            conn.close().await;
        }

        drop(lock_unpoisoned(&self.listener).take());
    }

    /// The path this server is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The frame configuration applied to accepted connections.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

async fn accept_loop(
    socket: Arc<UnixDomainSocket>,
    tx: mpsc::Sender<Connection>,
    accepted: Arc<StdMutex<Vec<Connection>>>,
    deliveries: TaskTracker,
    cancel: CancellationToken,
    config: FrameConfig,
) {
    loop {
        let stream = tokio::select! {
            res = socket.accept() => match res {
                Ok(stream) => stream,
                Err(err) => {
                    // Accept failures during shutdown are expected; anything
                    // else is fatal for this server, with no restart.
                    if cancel.is_cancelled() {
                        break;
                    }
                    error!(error = %err, "accept failed; stopping accept loop");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        };

        // Child token: closing the server cascades into every accepted
        // connection, while closing one connection stays local to it.
        let conn = Connection::spawn(stream, cancel.child_token(), config.clone());
        lock_unpoisoned(&accepted).push(conn.clone());

        let tx = tx.clone();
        let delivery_cancel = cancel.clone();
        deliveries.spawn(async move {
            tokio::select! {
                res = tx.send(conn) => {
                    let _ = res; // consumer gone; connection stays tracked
                }
                _ = delivery_cancel.cancelled() => {}
            }
        });
    }
}
