use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod doctor;
pub mod echo;
pub mod listen;
pub mod route;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a message router until Ctrl-C.
    Route(RouteArgs),
    /// Start an echo server.
    Echo(EchoArgs),
    /// Connect under a name and send one routed message.
    Send(SendArgs),
    /// Connect under a name and print routed messages as they arrive.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Route(args) => route::run(args, format).await,
        Command::Echo(args) => echo::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format).await,
    }
}

#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Socket path to bind.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Stop accepting after N connections and exit once they disconnect.
    #[arg(long, value_name = "N")]
    pub max_conns: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path of the router to connect to.
    pub path: PathBuf,
    /// Name to register under.
    #[arg(long)]
    pub name: String,
    /// Destination client name.
    #[arg(long)]
    pub to: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one routed reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for a reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path of the router to connect to.
    pub path: PathBuf,
    /// Name to register under.
    #[arg(long)]
    pub name: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}
