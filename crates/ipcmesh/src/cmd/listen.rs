use ipcmesh_router::NamedClient;

use crate::cmd::ListenArgs;
use crate::exit::{router_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_routed, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let client = NamedClient::connect(&args.path, args.name.as_str())
        .await
        .map_err(|err| router_error("connect failed", err))?;

    let mut printed = 0usize;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.map_err(|err| {
                    CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
                })?;
                break;
            }
            received = client.recv() => {
                match received {
                    Ok(Some((source, payload))) => {
                        print_routed(&source, &payload, format);
                        printed = printed.saturating_add(1);
                        if args.count.is_some_and(|count| printed >= count) {
                            break;
                        }
                    }
                    // Router went away; nothing more will arrive.
                    Ok(None) => break,
                    Err(err) => {
                        client.close().await;
                        return Err(router_error("receive failed", err));
                    }
                }
            }
        }
    }

    client.close().await;
    Ok(SUCCESS)
}
