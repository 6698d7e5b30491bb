//! Addressed messaging between named clients over the framed layer.
//!
//! Many processes connect to one [`Router`] socket, declare an identity with
//! their first message, and then exchange payloads by destination name,
//! emulating a point-to-point mesh through a single rendezvous server. The
//! whole layer is built on the framed crate's public contract; there is no raw
//! socket code here.
//!
//! A routed message is one framed message of the form `<name> NUL <payload>`:
//! outbound the name is the destination, inbound it is the source. Messages to
//! a name nobody has registered are logged and dropped.
//!
//! ```no_run
//! # async fn demo() -> ipcmesh_router::Result<()> {
//! let router = ipcmesh_router::Router::bind("/tmp/mesh.sock").await?;
//! let mic = ipcmesh_router::NamedClient::connect("/tmp/mesh.sock", "mic").await?;
//! let ai = ipcmesh_router::NamedClient::connect("/tmp/mesh.sock", "ai").await?;
//! mic.send("ai", b"wake word heard").await?;
//! if let Some((source, payload)) = ai.recv().await? {
//!     assert_eq!(source, "mic");
//!     assert_eq!(payload.as_ref(), b"wake word heard");
//! }
//! router.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod envelope;
pub mod error;
pub mod router;

pub use client::NamedClient;
pub use envelope::{encode_envelope, split_envelope, validate_name, NAME_SEPARATOR};
pub use error::{Result, RouterError};
pub use router::Router;
