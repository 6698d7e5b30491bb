use ipcmesh_router::Router;

use crate::cmd::RouteArgs;
use crate::exit::{router_error, CliError, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(args: RouteArgs, _format: OutputFormat) -> CliResult<i32> {
    let router = Router::bind(&args.path)
        .await
        .map_err(|err| router_error("bind failed", err))?;

    wait_for_ctrl_c().await?;
    tracing::info!("shutting down router");
    router.close().await;

    Ok(SUCCESS)
}

pub(crate) async fn wait_for_ctrl_c() -> CliResult<()> {
    tokio::signal::ctrl_c().await.map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
