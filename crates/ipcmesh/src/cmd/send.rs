use std::fs;
use std::time::Duration;

use ipcmesh_router::NamedClient;

use crate::cmd::SendArgs;
use crate::exit::{router_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_routed, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let client = NamedClient::connect(&args.path, args.name.as_str())
        .await
        .map_err(|err| router_error("connect failed", err))?;

    let outcome = deliver(&client, &args, &payload, wait_timeout, format).await;
    client.close().await;
    outcome
}

async fn deliver(
    client: &NamedClient,
    args: &SendArgs,
    payload: &[u8],
    wait_timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    client
        .send(&args.to, payload)
        .await
        .map_err(|err| router_error("send failed", err))?;

    if !args.wait {
        return Ok(SUCCESS);
    }

    match tokio::time::timeout(wait_timeout, client.recv()).await {
        Err(_) => Err(CliError::new(
            TIMEOUT,
            format!("no reply within {wait_timeout:?}"),
        )),
        Ok(Err(err)) => Err(router_error("receive failed", err)),
        Ok(Ok(None)) => Err(CliError::new(
            FAILURE,
            "connection closed before a reply arrived",
        )),
        Ok(Ok(Some((source, reply)))) => {
            print_routed(&source, &reply, format);
            Ok(SUCCESS)
        }
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
