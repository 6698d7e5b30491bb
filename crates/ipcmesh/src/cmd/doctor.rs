use std::path::PathBuf;
use std::time::Duration;

use ipcmesh_transport::UnixDomainSocket;
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub async fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        platform_transport_check(),
        temp_socket_bind_check(),
        async_runtime_check().await,
        peer_credentials_check(),
        socket_path_headroom_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };

    let output = DoctorOutput { checks, overall };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("ipcmesh doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<22} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
    }
}

fn platform_transport_check() -> CheckResult {
    CheckResult {
        name: "platform_transport".to_string(),
        status: CheckStatus::Pass,
        detail: "Unix domain sockets available".to_string(),
    }
}

fn temp_socket_bind_check() -> CheckResult {
    let dir = PathBuf::from(format!(
        "/tmp/ipcmesh-doctor-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    let _ = std::fs::create_dir_all(&dir);
    let sock = dir.join("doctor.sock");
    let result = UnixDomainSocket::bind(&sock);
    let _ = std::fs::remove_dir_all(&dir);

    match result {
        Ok(_) => CheckResult {
            name: "temp_socket_bind".to_string(),
            status: CheckStatus::Pass,
            detail: "/tmp socket bind succeeded".to_string(),
        },
        Err(err) => CheckResult {
            name: "temp_socket_bind".to_string(),
            status: CheckStatus::Fail,
            detail: format!("/tmp socket bind failed: {err}"),
        },
    }
}

async fn async_runtime_check() -> CheckResult {
    let handle = tokio::spawn(async { true });
    let (status, detail) = match tokio::time::timeout(Duration::from_secs(1), handle).await {
        Ok(Ok(_)) => (CheckStatus::Pass, "task spawn and join work".to_string()),
        Ok(Err(err)) => (CheckStatus::Fail, format!("spawned task panicked: {err}")),
        Err(_) => (
            CheckStatus::Fail,
            "spawned task did not complete within 1s".to_string(),
        ),
    };

    CheckResult {
        name: "async_runtime".to_string(),
        status,
        detail,
    }
}

fn peer_credentials_check() -> CheckResult {
    let (status, detail) = match tokio::net::UnixStream::pair() {
        Ok((left, _right)) => match left.peer_cred() {
            Ok(cred) => (
                CheckStatus::Pass,
                format!(
                    "SO_PEERCRED readable (uid={}, gid={})",
                    cred.uid(),
                    cred.gid()
                ),
            ),
            Err(err) => (
                CheckStatus::Fail,
                format!("peer credential lookup failed: {err}"),
            ),
        },
        Err(err) => (CheckStatus::Fail, format!("socketpair failed: {err}")),
    };

    CheckResult {
        name: "peer_credentials".to_string(),
        status,
        detail,
    }
}

fn socket_path_headroom_check() -> CheckResult {
    let limit: usize = if cfg!(target_os = "linux") { 108 } else { 104 };
    let temp = std::env::temp_dir();
    let used = temp.as_os_str().len();
    let headroom = limit.saturating_sub(used);

    let (status, detail) = if headroom < 32 {
        (
            CheckStatus::Warn,
            format!(
                "{} leaves only {headroom} of {limit} sun_path bytes for socket names",
                temp.display()
            ),
        )
    } else {
        (
            CheckStatus::Info,
            format!(
                "{} leaves {headroom} of {limit} sun_path bytes for socket names",
                temp.display()
            ),
        )
    };

    CheckResult {
        name: "socket_path_headroom".to_string(),
        status,
        detail,
    }
}
