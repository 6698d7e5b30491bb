//! Mesh round trip: one router, two named clients exchanging addressed
//! messages over a single socket.
//!
//! Run with:
//!   cargo run --example mesh-demo

use std::time::Duration;

use ipcmesh::router::{NamedClient, Router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("ipcmesh-mesh-{}", std::process::id()));
    std::fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("mesh.sock");

    let router = Router::bind(&sock_path).await?;
    eprintln!("Router on {}", sock_path.display());

    let mic = NamedClient::connect(&sock_path, "mic").await?;
    let ai = NamedClient::connect(&sock_path, "ai").await?;

    // Registration completes asynchronously after the handshake; give the
    // router a beat before the first addressed send.
    tokio::time::sleep(Duration::from_millis(150)).await;

    mic.send("ai", b"did you catch that?").await?;
    if let Some((source, payload)) = ai.recv().await? {
        eprintln!("ai heard {source}: {}", String::from_utf8_lossy(&payload));
        ai.send(&source, b"loud and clear").await?;
    }

    if let Some((source, payload)) = mic.recv().await? {
        eprintln!("mic heard {source}: {}", String::from_utf8_lossy(&payload));
    }

    mic.close().await;
    ai.close().await;
    router.close().await;
    let _ = std::fs::remove_dir_all(&sock_dir);
    Ok(())
}
