//! Minimal echo server: accepts one framed connection and echoes every
//! message back.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! The demo drives the server from a client task in the same process, then
//! shuts down. To serve external clients instead, use the CLI:
//!   cargo run -- echo /tmp/ipcmesh-echo.sock

use ipcmesh::frame::{connect, FrameError, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("ipcmesh-echo-{}", std::process::id()));
    std::fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");

    let server = Server::bind(&sock_path).await?;
    eprintln!("Listening on {}", sock_path.display());

    let client_path = sock_path.clone();
    let client = tokio::spawn(async move {
        let conn = connect(&client_path).await?;
        for text in ["one", "two", "three"] {
            conn.send(text.as_bytes()).await?;
            if let Some(echoed) = conn.recv().await {
                eprintln!("client got back: {}", String::from_utf8_lossy(&echoed));
            }
        }
        conn.close().await;
        Ok::<(), FrameError>(())
    });

    // Serve exactly one connection, echoing until it disconnects.
    if let Some(conn) = server.accept().await {
        while let Some(payload) = conn.recv().await {
            eprintln!("server echoing {} bytes", payload.len());
            conn.send(&payload).await?;
        }
    }

    client.await??;
    server.close().await;
    let _ = std::fs::remove_dir_all(&sock_dir);
    Ok(())
}
