//! Length-prefixed message framing over Unix domain sockets.
//!
//! This layer turns a continuous byte stream into discrete messages. Every
//! message is preceded on the wire by its 4-byte little-endian length; the
//! payload itself is opaque. No magic number, no version field, no checksum.
//!
//! [`Connection`] wraps one socket endpoint and owns a background reader task,
//! so callers see whole messages and never deal with partial reads.
//! [`Server`] listens on a socket path and hands out accepted [`Connection`]s;
//! [`connect`] is the dialing counterpart. Shutdown is cooperative and
//! deterministic: closing a connection or server joins every task it spawned
//! before returning.
//!
//! ```no_run
//! # async fn demo() -> ipcmesh_frame::Result<()> {
//! let server = ipcmesh_frame::Server::bind("/tmp/demo.sock").await?;
//! let client = ipcmesh_frame::connect("/tmp/demo.sock").await?;
//! client.send(b"ping").await?;
//! if let Some(conn) = server.accept().await {
//!     let msg = conn.recv().await;
//!     assert_eq!(msg.as_deref(), Some(&b"ping"[..]));
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod conn;
pub mod error;
pub mod server;

pub use client::{connect, connect_with_config};
pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, LEN_PREFIX_SIZE};
pub use conn::Connection;
pub use error::{FrameError, Result};
pub use server::Server;
