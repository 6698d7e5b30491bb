//! Unix domain socket transport for ipcmesh.
//!
//! This is the lowest layer of the workspace: it binds and dials
//! filesystem-path sockets and hands ready [`tokio::net::UnixStream`]s to the
//! framing layer above. Binding goes through the standard library first so the
//! socket file can be permission-hardened and stale-socket-checked before the
//! runtime takes over the descriptor.
//!
//! Unix only. Each listening service is identified by a well-known socket
//! path; there is no network exposure.

pub mod error;
pub mod uds;

pub use error::{Result, TransportError};
pub use uds::UnixDomainSocket;
