use std::time::Duration;

use clap::{Args, Subcommand};
use zrpc_peer::{ChannelConfig, ClientConfig};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod inspect;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Invoke a procedure and print every reply.
    Call(CallArgs),
    /// List the procedures a server exposes.
    Inspect(InspectArgs),
    /// Serve the demo procedures (echo, add, range, sleep).
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, heartbeat: &str) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format, heartbeat),
        Command::Inspect(args) => inspect::run(args, format, heartbeat),
        Command::Serve(args) => serve::run(args, heartbeat),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server address (tcp://host:port or ipc:///path).
    pub address: String,
    /// Procedure name.
    pub method: String,
    /// Arguments, parsed as JSON and falling back to plain strings.
    pub args: Vec<String>,
    /// Maximum time to wait for the connection (e.g. 5s, 500ms).
    #[arg(long, env = "ZRPC_CONNECT_TIMEOUT", default_value = "5s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Server address (tcp://host:port or ipc:///path).
    pub address: String,
    /// Maximum time to wait for the connection (e.g. 5s, 500ms).
    #[arg(long, env = "ZRPC_CONNECT_TIMEOUT", default_value = "5s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (tcp://host:port or ipc:///path).
    pub address: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
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
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn channel_config(heartbeat: &str) -> CliResult<ChannelConfig> {
    Ok(ChannelConfig::with_heartbeat(parse_duration(heartbeat)?))
}

pub(crate) fn client_config(heartbeat: &str, connect_timeout: &str) -> CliResult<ClientConfig> {
    Ok(ClientConfig {
        connect_timeout: parse_duration(connect_timeout)?,
        channel: channel_config(heartbeat)?,
    })
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))
}
