use ipcmesh_frame::{Connection, Server};
use tokio_util::task::TaskTracker;

use crate::cmd::EchoArgs;
use crate::exit::{frame_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

enum Stop {
    Signal,
    Capped,
}

pub async fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let server = Server::bind(&args.path)
        .await
        .map_err(|err| frame_error("bind failed", err))?;

    let tracker = TaskTracker::new();
    let mut accepted = 0usize;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let stop = loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.map_err(|err| {
                    CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
                })?;
                break Stop::Signal;
            }
            conn = server.accept() => {
                let Some(conn) = conn else { break Stop::Signal };
                accepted += 1;
                tracing::debug!(accepted, "echoing for new connection");
                tracker.spawn(echo_session(conn));
                if cap_reached(accepted, args.max_conns) {
                    break Stop::Capped;
                }
            }
        }
    };

    match stop {
        // Let in-flight sessions run to client disconnect before the
        // listener goes away.
        Stop::Capped => {
            tracker.close();
            tracker.wait().await;
            server.close().await;
        }
        Stop::Signal => {
            server.close().await;
            tracker.close();
            tracker.wait().await;
        }
    }

    Ok(SUCCESS)
}

async fn echo_session(conn: Connection) {
    while let Some(payload) = conn.recv().await {
        if let Err(err) = conn.send(&payload).await {
            tracing::warn!(error = %err, "echo send failed");
            break;
        }
    }
    conn.close().await;
}

fn cap_reached(accepted: usize, max_conns: Option<usize>) -> bool {
    max_conns.is_some_and(|max| accepted >= max)
}
