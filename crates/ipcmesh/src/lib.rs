//! Local IPC mesh for cooperating processes on one host.
//!
//! ipcmesh turns a single Unix domain socket into a small message mesh:
//! a framed, bidirectional channel per connection, and a router that lets
//! many named clients exchange addressed messages through one rendezvous
//! socket.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket binding and dialing, with path
//!   validation, stale-socket cleanup, and owner-only permissions
//! - [`frame`]: length-prefixed message framing over one stream connection,
//!   plus a connection-accepting `Server`
//! - [`router`]: named clients and the routing server that forwards
//!   addressed messages between them
//!
//! # Example
//!
//! A router with two named clients exchanging one message:
//!
//! ```no_run
//! use ipcmesh::router::{NamedClient, Router};
//!
//! # async fn demo() -> ipcmesh::router::Result<()> {
//! let router = Router::bind("/tmp/mesh.sock").await?;
//!
//! let mic = NamedClient::connect("/tmp/mesh.sock", "mic").await?;
//! let ai = NamedClient::connect("/tmp/mesh.sock", "ai").await?;
//!
//! mic.send("ai", b"transcript ready").await?;
//! if let Some((source, payload)) = ai.recv().await? {
//!     println!("{source} says: {payload:?}");
//! }
//!
//! mic.close().await;
//! ai.close().await;
//! router.close().await;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use ipcmesh_transport::*;
}

/// Re-export framed-messaging types.
pub mod frame {
    pub use ipcmesh_frame::*;
}

/// Re-export routing types.
pub mod router {
    pub use ipcmesh_router::*;
}
