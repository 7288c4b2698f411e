use serde_json::Value;
use zrpc_peer::Client;

use crate::cmd::{client_config, runtime, CallArgs};
use crate::exit::{peer_error, rpc_error, CliError, CliResult, SUCCESS};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat, heartbeat: &str) -> CliResult<i32> {
    let config = client_config(heartbeat, &args.connect_timeout)?;
    let params: Vec<Value> = args.args.iter().map(|arg| parse_arg(arg)).collect();

    runtime()?.block_on(async {
        let client = Client::connect(&args.address, config)
            .map_err(|err| peer_error("connect failed", err))?;
        let mut stream = client.invoke(&args.method, params);

        while let Some(item) = stream.recv().await {
            let reply = item.map_err(|err| rpc_error(&format!("{} failed", args.method), err))?;
            print_reply(&args.method, &reply, format);
        }

        client.close();
        Ok::<_, CliError>(SUCCESS)
    })
}

/// Interpret a command-line argument as JSON, or as a plain string if it
/// does not parse.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
