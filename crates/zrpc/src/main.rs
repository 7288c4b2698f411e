mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "zrpc", version, about = "Streaming RPC client and demo server")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Close calls that see no traffic for this long (e.g. 30s, 500ms).
    #[arg(
        long,
        value_name = "DURATION",
        env = "ZRPC_HEARTBEAT",
        default_value = "30s",
        global = true
    )]
    heartbeat: String,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, &cli.heartbeat);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_json_args() {
        let cli = Cli::try_parse_from([
            "zrpc",
            "call",
            "tcp://127.0.0.1:4242",
            "add42",
            "30",
        ])
        .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.method, "add42");
                assert_eq!(args.args, vec!["30".to_string()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "zrpc",
            "inspect",
            "ipc:///tmp/zrpc.sock",
            "--heartbeat",
            "500ms",
            "--format",
            "json",
        ])
        .expect("inspect args should parse");

        assert!(matches!(cli.command, Command::Inspect(_)));
        assert_eq!(cli.heartbeat, "500ms");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
    }

    #[test]
    fn call_requires_method() {
        let err = Cli::try_parse_from(["zrpc", "call", "tcp://127.0.0.1:4242"])
            .expect_err("missing method should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from(["zrpc", "serve", "tcp://0.0.0.0:4242"])
            .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(_)));
    }
}
